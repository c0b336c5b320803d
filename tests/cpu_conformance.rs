//! Table-driven instruction checks. Cases are JSON records of entry state,
//! memory, and the expected exit state, so new ones can be added without
//! touching the harness.

mod common;

use common::FlatBus;
use dotboy::cpu::Cpu;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
struct RegState {
    a: u8,
    f: u8,
    b: u8,
    c: u8,
    d: u8,
    e: u8,
    h: u8,
    l: u8,
    pc: u16,
    sp: u16,
}

#[derive(Deserialize, Debug)]
struct Case {
    name: String,
    entry: RegState,
    /// (address, byte) pairs laid into memory before the step.
    #[serde(default)]
    mem: Vec<(u16, u8)>,
    exit: RegState,
    cycles: u32,
}

const CASES: &str = r#"[
  {
    "name": "add with half carry",
    "entry": { "a": 15, "b": 1, "pc": 256 },
    "mem": [[256, 128]],
    "exit": { "a": 16, "f": 32, "b": 1, "pc": 257 },
    "cycles": 4
  },
  {
    "name": "add overflow sets zero and carry",
    "entry": { "a": 128, "b": 128, "pc": 256 },
    "mem": [[256, 128]],
    "exit": { "a": 0, "f": 144, "b": 128, "pc": 257 },
    "cycles": 4
  },
  {
    "name": "adc consumes incoming carry",
    "entry": { "a": 255, "f": 16, "pc": 256 },
    "mem": [[256, 136]],
    "exit": { "a": 0, "f": 176, "pc": 257 },
    "cycles": 4
  },
  {
    "name": "sbc borrows through",
    "entry": { "a": 0, "f": 16, "pc": 256 },
    "mem": [[256, 152]],
    "exit": { "a": 255, "f": 112, "pc": 257 },
    "cycles": 4
  },
  {
    "name": "rlca always clears zero",
    "entry": { "a": 133, "f": 128, "pc": 256 },
    "mem": [[256, 7]],
    "exit": { "a": 11, "f": 16, "pc": 257 },
    "cycles": 4
  },
  {
    "name": "ld a from hl with post increment",
    "entry": { "h": 192, "l": 255, "pc": 256 },
    "mem": [[256, 42], [49407, 66]],
    "exit": { "a": 66, "h": 193, "l": 0, "pc": 257 },
    "cycles": 8
  },
  {
    "name": "jr with negative offset",
    "entry": { "pc": 512 },
    "mem": [[512, 24], [513, 254]],
    "exit": { "pc": 512 },
    "cycles": 12
  },
  {
    "name": "cp leaves a untouched",
    "entry": { "a": 144, "pc": 256 },
    "mem": [[256, 254], [257, 144]],
    "exit": { "a": 144, "f": 192, "pc": 258 },
    "cycles": 8
  },
  {
    "name": "add sp with negative operand",
    "entry": { "pc": 256, "sp": 0 },
    "mem": [[256, 232], [257, 255]],
    "exit": { "pc": 258, "sp": 65535 },
    "cycles": 16
  },
  {
    "name": "ld hl sp plus offset sets carries",
    "entry": { "pc": 256, "sp": 4095 },
    "mem": [[256, 248], [257, 1]],
    "exit": { "f": 48, "h": 16, "l": 0, "pc": 258, "sp": 4095 },
    "cycles": 12
  },
  {
    "name": "swap clears flags",
    "entry": { "a": 240, "f": 112, "pc": 256 },
    "mem": [[256, 203], [257, 55]],
    "exit": { "a": 15, "pc": 258 },
    "cycles": 8
  },
  {
    "name": "bit seven preserves carry",
    "entry": { "h": 127, "f": 16, "pc": 256 },
    "mem": [[256, 203], [257, 124]],
    "exit": { "h": 127, "f": 176, "pc": 258 },
    "cycles": 8
  }
]"#;

fn apply(cpu: &mut Cpu, regs: RegState) {
    cpu.a = regs.a;
    cpu.f = regs.f;
    cpu.b = regs.b;
    cpu.c = regs.c;
    cpu.d = regs.d;
    cpu.e = regs.e;
    cpu.h = regs.h;
    cpu.l = regs.l;
    cpu.pc = regs.pc;
    cpu.sp = regs.sp;
}

fn observe(cpu: &Cpu) -> RegState {
    RegState {
        a: cpu.a,
        f: cpu.f,
        b: cpu.b,
        c: cpu.c,
        d: cpu.d,
        e: cpu.e,
        h: cpu.h,
        l: cpu.l,
        pc: cpu.pc,
        sp: cpu.sp,
    }
}

#[test]
fn conformance_cases() {
    let cases: Vec<Case> = serde_json::from_str(CASES).expect("case table parses");
    for case in cases {
        let mut bus = FlatBus::new();
        for (addr, byte) in &case.mem {
            bus.mem[*addr as usize] = *byte;
        }
        let mut cpu = Cpu::new();
        apply(&mut cpu, case.entry);
        let cycles = cpu
            .step(&mut bus)
            .unwrap_or_else(|e| panic!("{}: {e}", case.name));
        assert_eq!(cycles, case.cycles, "{}: cycles", case.name);
        assert_eq!(observe(&cpu), case.exit, "{}", case.name);
    }
}
