mod common;

use std::fs;

use common::banked_rom;
use dotboy::cartridge::Cartridge;

#[test]
fn rom_only_ignores_bank_writes() {
    let mut cart = Cartridge::new(banked_rom(2, 0x00, 0x00)).unwrap();
    cart.write(0x2000, 0x05);
    assert_eq!(cart.read(0x4000), 1); // still the linear image
    assert_eq!(cart.read(0xA000), 0xFF);
}

#[test]
fn mbc1_bank_zero_write_selects_bank_one() {
    let mut cart = Cartridge::new(banked_rom(4, 0x01, 0x00)).unwrap();
    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 1);
}

#[test]
fn mbc1_bank_select_wraps_to_fitted_size() {
    let mut cart = Cartridge::new(banked_rom(4, 0x01, 0x00)).unwrap();
    // Bank 5 on a 4-bank image wraps to bank 1.
    cart.write(0x2000, 0x05);
    assert_eq!(cart.read(0x4000), 1);
    cart.write(0x2000, 0x07);
    assert_eq!(cart.read(0x4000), 3);
}

#[test]
fn mbc1_mode_routes_the_two_bit_register() {
    let mut cart = Cartridge::new(banked_rom(4, 0x03, 0x03)).unwrap(); // 32K RAM
    cart.write(0x0000, 0x0A);

    // Mode 0: the 0x4000 write is a ROM high-bank register, RAM stays on
    // bank 0.
    cart.write(0x4000, 0x01);
    cart.write(0xA000, 0x11);

    // Mode 1: the same register now picks the RAM bank.
    cart.write(0x6000, 0x01);
    cart.write(0x4000, 0x02);
    cart.write(0xA000, 0x22);

    cart.write(0x4000, 0x00);
    assert_eq!(cart.read(0xA000), 0x11);
    cart.write(0x4000, 0x02);
    assert_eq!(cart.read(0xA000), 0x22);
}

#[test]
fn mbc1_ram_reads_open_bus_while_disabled() {
    let mut cart = Cartridge::new(banked_rom(4, 0x03, 0x02)).unwrap();
    assert_eq!(cart.read(0xA000), 0xFF);
    cart.write(0xA000, 0x55); // dropped
    cart.write(0x0000, 0x0A);
    assert_eq!(cart.read(0xA000), 0x00);
    cart.write(0xA000, 0x55);
    cart.write(0x0000, 0x00); // disable again
    assert_eq!(cart.read(0xA000), 0xFF);
}

#[test]
fn mbc2_register_select_by_address_bit_8() {
    let mut cart = Cartridge::new(banked_rom(8, 0x06, 0x00)).unwrap();
    // Bit 8 clear: RAM gate. Bit 8 set: ROM bank.
    cart.write(0x0000, 0x0A);
    cart.write(0x0100, 0x07);
    assert_eq!(cart.read(0x4000), 7);

    // Bank values wrap to the fitted size.
    cart.write(0x0100, 0x0A);
    assert_eq!(cart.read(0x4000), 2);

    // Writes through the bank address leave the RAM gate alone.
    cart.write(0xA000, 0x05);
    assert_eq!(cart.read(0xA000), 0xF5);
}

#[test]
fn mbc2_ram_is_nibbles_mirrored_over_the_window() {
    let mut cart = Cartridge::new(banked_rom(2, 0x06, 0x00)).unwrap();
    cart.write(0x0000, 0x0A);
    cart.write(0xA000, 0xAB);
    assert_eq!(cart.read(0xA000), 0xFB); // upper nibble undriven
    assert_eq!(cart.read(0xA200), 0xFB); // 512-cell mirror
    cart.write(0xA3FF, 0x04);
    assert_eq!(cart.read(0xA1FF), 0xF4);
}

#[test]
fn mbc3_ram_and_rom_banking() {
    let mut cart = Cartridge::new(banked_rom(8, 0x13, 0x03)).unwrap();
    cart.write(0x2000, 0x06);
    assert_eq!(cart.read(0x4000), 6);
    cart.write(0x2000, 0x00);
    assert_eq!(cart.read(0x4000), 1);

    cart.write(0x0000, 0x0A);
    cart.write(0x4000, 0x03);
    cart.write(0xA000, 0x33);
    cart.write(0x4000, 0x00);
    cart.write(0xA000, 0x44);
    cart.write(0x4000, 0x03);
    assert_eq!(cart.read(0xA000), 0x33);
}

#[test]
fn mbc5_nine_bit_bank_and_true_bank_zero() {
    let mut cart = Cartridge::new(banked_rom(4, 0x19, 0x00)).unwrap();
    cart.write(0x2000, 0x03);
    cart.write(0x3000, 0x01); // bank 0x103, wraps mod 4 to 3
    assert_eq!(cart.read(0x4000), 3);

    // Unlike MBC1, bank 0 is selectable.
    cart.write(0x2000, 0x00);
    cart.write(0x3000, 0x00);
    assert_eq!(cart.read(0x4000), cart.read(0x0000));
}

#[test]
fn mbc5_rumble_bit_drives_the_motor() {
    let mut cart = Cartridge::new(banked_rom(4, 0x1C, 0x02)).unwrap();
    assert!(!cart.rumble_active());
    cart.write(0x4000, 0x08);
    assert!(cart.rumble_active());
    cart.write(0x4000, 0x00);
    assert!(!cart.rumble_active());
}

#[test]
fn battery_save_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.sav");

    let mut cart = Cartridge::new(banked_rom(2, 0x03, 0x02)).unwrap();
    cart.write(0x0000, 0x0A);
    cart.write(0xA000, 0xDE);
    cart.write(0xA001, 0xAD);
    fs::write(&path, cart.save_bytes()).unwrap();

    let mut restored = Cartridge::new(banked_rom(2, 0x03, 0x02)).unwrap();
    restored.load_save_bytes(&fs::read(&path).unwrap());
    restored.write(0x0000, 0x0A);
    assert_eq!(restored.read(0xA000), 0xDE);
    assert_eq!(restored.read(0xA001), 0xAD);
}

#[test]
fn save_bytes_only_for_battery_carts() {
    let cart = Cartridge::new(banked_rom(2, 0x01, 0x02)).unwrap(); // no battery
    assert!(!cart.has_battery());
    let cart = Cartridge::new(banked_rom(2, 0x03, 0x02)).unwrap();
    assert!(cart.has_battery());
}
