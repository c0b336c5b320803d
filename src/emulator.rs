use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, error, info};

use crate::cpu::{CpuError, RegisterDump};
use crate::gameboy::{CYCLES_PER_FRAME, GameBoy};
use crate::mmu::BusEvent;
use crate::watchpoints::{Trigger, WatchpointHit};

/// Wall-clock length of one frame: 70224 dots at 4194304 Hz, ~59.73 Hz.
pub const FRAME_DURATION: Duration = Duration::from_nanos(16_742_706);

/// Everything the run loop reports to the frontend.
#[derive(Debug)]
pub enum Event {
    /// A finished 160x144 0RGB frame.
    Frame(Vec<u32>),
    /// Emulation hit a fatal error and stopped.
    Fault {
        error: CpuError,
        regs: RegisterDump,
    },
    LcdEnableChanged(bool),
    SerialStarted,
    /// A watchpoint fired; the loop pauses itself before sending this.
    WatchpointHit(WatchpointHit),
}

/// Owns the run loop. The machine sits behind a mutex so handles can poke
/// at it while the loop is paused; pause and stop flags are plain atomics
/// checked between steps, so at most one in-flight instruction finishes
/// after either is raised.
pub struct Emulator {
    machine: Arc<Mutex<GameBoy>>,
    paused: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    events: Sender<Event>,
    /// Pace to real time; turn off for headless batch runs.
    pub limit_rate: bool,
}

/// Cloneable remote control for a running `Emulator`.
#[derive(Clone)]
pub struct EmulatorHandle {
    machine: Arc<Mutex<GameBoy>>,
    paused: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
}

fn lock(machine: &Mutex<GameBoy>) -> MutexGuard<'_, GameBoy> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Emulator {
    pub fn new(gb: GameBoy) -> (Self, Receiver<Event>) {
        let (tx, rx) = unbounded();
        let emulator = Self {
            machine: Arc::new(Mutex::new(gb)),
            paused: Arc::new(AtomicBool::new(false)),
            stopping: Arc::new(AtomicBool::new(false)),
            events: tx,
            limit_rate: true,
        };
        (emulator, rx)
    }

    pub fn handle(&self) -> EmulatorHandle {
        EmulatorHandle {
            machine: Arc::clone(&self.machine),
            paused: Arc::clone(&self.paused),
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Drive the machine until stopped. Meant to own its thread.
    pub fn run(self) {
        info!("emulation started");
        let mut deadline = Instant::now() + FRAME_DURATION;
        while !self.stopping.load(Ordering::Relaxed) {
            if self.paused.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
                deadline = Instant::now() + FRAME_DURATION;
                continue;
            }
            self.run_slice();
            if self.limit_rate {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                    deadline += FRAME_DURATION;
                } else {
                    // Running behind; resynchronize rather than sprint.
                    deadline = now + FRAME_DURATION;
                }
            }
        }
        info!("emulation stopped");
    }

    /// Step until the next frame (or about a frame's worth of cycles when
    /// the LCD is off), holding the machine lock only for the slice.
    fn run_slice(&self) {
        let mut pending: Vec<Event> = Vec::new();
        {
            let mut gb = lock(&self.machine);
            let mut budget = CYCLES_PER_FRAME * 2;
            loop {
                if self.stopping.load(Ordering::Relaxed) || self.paused.load(Ordering::Relaxed) {
                    break;
                }
                let pc = gb.cpu.pc;
                gb.mmu.watchpoints.note_execute(pc);
                if let Some(hit) = gb.mmu.watchpoints.take_hit() {
                    debug!("execute watchpoint at {:#06x}", hit.addr);
                    // Suspend so resuming can step past the hit site.
                    gb.mmu.watchpoints.suspended = true;
                    self.paused.store(true, Ordering::Relaxed);
                    pending.push(Event::WatchpointHit(hit));
                    break;
                }

                match gb.step() {
                    Ok(cycles) => budget = budget.saturating_sub(cycles),
                    Err(err) => {
                        let regs = gb.cpu.dump();
                        error!("fatal: {err} [{regs}]");
                        self.stopping.store(true, Ordering::Relaxed);
                        pending.push(Event::Fault { error: err, regs });
                        break;
                    }
                }
                gb.mmu.watchpoints.suspended = false;

                for ev in gb.take_events() {
                    pending.push(match ev {
                        BusEvent::LcdEnableChanged(on) => Event::LcdEnableChanged(on),
                        BusEvent::SerialStarted => Event::SerialStarted,
                    });
                }
                if let Some(hit) = gb.mmu.watchpoints.take_hit() {
                    debug!("{:?} watchpoint at {:#06x}", hit.trigger, hit.addr);
                    if hit.trigger == Trigger::Execute {
                        gb.mmu.watchpoints.suspended = true;
                    }
                    self.paused.store(true, Ordering::Relaxed);
                    pending.push(Event::WatchpointHit(hit));
                    break;
                }

                if let Some(frame) = gb.take_frame() {
                    pending.push(Event::Frame(frame));
                    break;
                }
                if budget == 0 {
                    break;
                }
            }
        }
        for event in pending {
            if self.events.send(event).is_err() {
                // Receiver gone; nobody is listening anymore.
                self.stopping.store(true, Ordering::Relaxed);
                return;
            }
        }
    }
}

impl EmulatorHandle {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }

    /// Execute a single instruction while paused.
    pub fn step_once(&self) -> Result<u32, CpuError> {
        let mut gb = lock(&self.machine);
        let cycles = gb.step()?;
        gb.mmu.watchpoints.suspended = false;
        Ok(cycles)
    }

    /// Run a closure against the machine, for debugger-style inspection or
    /// button injection.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut GameBoy) -> R) -> R {
        f(&mut lock(&self.machine))
    }
}
