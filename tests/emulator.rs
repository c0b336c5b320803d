use std::thread;
use std::time::Duration;

use dotboy::cpu::CpuError;
use dotboy::emulator::{Emulator, Event};
use dotboy::gameboy::GameBoy;
use dotboy::ppu::{SCREEN_HEIGHT, SCREEN_WIDTH};
use dotboy::watchpoints::{Trigger, Watchpoint};

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// INC A then JP back to it: a tight two-instruction loop that runs forever
/// without touching memory.
fn loop_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0100] = 0x3C;
    rom[0x0101..0x0104].copy_from_slice(&[0xC3, 0x00, 0x01]);
    rom
}

/// NOPs up to 0x0110, then a jump-to-self at 0x0111.
fn watch_rom() -> Vec<u8> {
    let mut rom = vec![0u8; 0x8000];
    rom[0x0111..0x0114].copy_from_slice(&[0xC3, 0x11, 0x01]);
    rom
}

fn spawn(gb: GameBoy) -> (dotboy::emulator::EmulatorHandle, crossbeam_channel::Receiver<Event>, thread::JoinHandle<()>) {
    let (mut emulator, events) = Emulator::new(gb);
    emulator.limit_rate = false;
    let handle = emulator.handle();
    let worker = thread::spawn(move || emulator.run());
    (handle, events, worker)
}

#[test]
fn frames_flow_until_stopped() {
    let gb = GameBoy::with_rom(loop_rom(), None).unwrap();
    let (handle, events, worker) = spawn(gb);

    let mut frames = 0;
    while frames < 3 {
        match events.recv_timeout(RECV_TIMEOUT).expect("event") {
            Event::Frame(pixels) => {
                assert_eq!(pixels.len(), SCREEN_WIDTH * SCREEN_HEIGHT);
                frames += 1;
            }
            Event::Fault { error, .. } => panic!("unexpected fault: {error}"),
            _ => {}
        }
    }
    handle.stop();
    worker.join().unwrap();
}

#[test]
fn fault_stops_the_loop_with_a_register_dump() {
    let mut rom = loop_rom();
    rom[0x0100] = 0xD3;
    let gb = GameBoy::with_rom(rom, None).unwrap();
    let (_handle, events, worker) = spawn(gb);

    match events.recv_timeout(RECV_TIMEOUT).expect("event") {
        Event::Fault { error, regs } => {
            assert!(matches!(
                error,
                CpuError::IllegalOpcode { opcode: 0xD3, pc: 0x0100 }
            ));
            assert_eq!(regs.pc, 0x0100);
        }
        other => panic!("expected fault, got {other:?}"),
    }
    // The loop shut itself down; the channel closes.
    worker.join().unwrap();
    assert!(events.recv_timeout(RECV_TIMEOUT).is_err());
}

#[test]
fn pause_freezes_and_step_once_advances() {
    let gb = GameBoy::with_rom(loop_rom(), None).unwrap();
    let (handle, events, worker) = spawn(gb);

    // Let it run a little, then pause.
    assert!(events.recv_timeout(RECV_TIMEOUT).is_ok());
    handle.pause();
    thread::sleep(Duration::from_millis(50));
    while events.try_recv().is_ok() {}

    let pc_before = handle.with_machine(|gb| gb.cpu.pc);
    let cycles = handle.step_once().unwrap();
    assert_eq!(cycles % 4, 0);
    let pc_after = handle.with_machine(|gb| gb.cpu.pc);
    assert_ne!(pc_before, pc_after);

    // Paused loop produces nothing on its own.
    assert!(events.recv_timeout(Duration::from_millis(200)).is_err());

    handle.stop();
    worker.join().unwrap();
}

#[test]
fn execute_watchpoint_pauses_the_loop() {
    let gb = GameBoy::with_rom(watch_rom(), None).unwrap();
    let (mut emulator, events) = Emulator::new(gb);
    emulator.limit_rate = false;
    let handle = emulator.handle();
    handle.with_machine(|gb| {
        gb.mmu.watchpoints.add(Watchpoint {
            id: 0,
            start: 0x0110,
            end: 0x0110,
            on_read: false,
            on_write: false,
            on_execute: true,
            value: None,
        });
    });
    let worker = thread::spawn(move || emulator.run());

    loop {
        match events.recv_timeout(RECV_TIMEOUT).expect("event") {
            Event::WatchpointHit(hit) => {
                assert_eq!(hit.trigger, Trigger::Execute);
                assert_eq!(hit.addr, 0x0110);
                break;
            }
            Event::Fault { error, .. } => panic!("unexpected fault: {error}"),
            _ => {}
        }
    }
    assert!(handle.is_paused());
    assert_eq!(handle.with_machine(|gb| gb.cpu.pc), 0x0110);

    // Stepping past the hit site must not re-trigger immediately.
    handle.step_once().unwrap();
    assert_eq!(handle.with_machine(|gb| gb.cpu.pc), 0x0111);

    handle.stop();
    worker.join().unwrap();
}
