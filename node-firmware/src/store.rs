//! Flash-backed `NodeConfig` store.
//!
//! Persists the key/value fields `onHour, onMin, offHour, offMin,
//! gatewayId, configured, mode, lightState, registerInt, statusInt` as one
//! fixed-layout record in a reserved flash sector, trailed by a CRC-16
//! (the same `crc` crate and polynomial the firmware already uses for its
//! LoRa payload checksums). `save` erases the sector and reprograms it in
//! full. A reset mid-erase leaves the sector in the all-ones erased state,
//! which `load` reports as `NotFound` rather than misreading garbage.

use crc::{Crc, CRC_16_IBM_3740};
use stm32f4xx_hal::pac;
use streetlight_core::{ConfigStore, ControlMode, GatewayId, NodeConfig, Schedule, StoreError};

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Reserved sector for config storage (last 16 KB sector on the
/// 446RE's 512 KB flash map, sector 7).
const CONFIG_SECTOR: u8 = 7;
const CONFIG_SECTOR_ADDR: u32 = 0x0806_0000;

/// Wire size of the persisted record, CRC included. `GATEWAY_ID_CAP`
/// mirrors the wire codec's truncation width rather than the larger
/// in-memory `GatewayId` capacity.
const GATEWAY_ID_CAP: usize = 23;
const RECORD_LEN: usize = 4 // magic
    + 1 // gateway_id_len
    + GATEWAY_ID_CAP
    + 4 // on_hour, on_min, off_hour, off_min
    + 4 // register_interval_ms
    + 4 // status_interval_ms
    + 1 // configured
    + 1 // control_mode
    + 1 // light_state
    + 2; // crc16

const MAGIC: u32 = 0x4C54_5347; // "LTSG"

fn control_mode_to_byte(mode: ControlMode) -> u8 {
    match mode {
        ControlMode::Auto => 0,
        ControlMode::ManualOn => 1,
        ControlMode::ManualOff => 2,
    }
}

fn control_mode_from_byte(b: u8) -> Option<ControlMode> {
    match b {
        0 => Some(ControlMode::Auto),
        1 => Some(ControlMode::ManualOn),
        2 => Some(ControlMode::ManualOff),
        _ => None,
    }
}

fn encode_record(cfg: &NodeConfig) -> [u8; RECORD_LEN] {
    let mut buf = [0u8; RECORD_LEN];
    let mut i = 0;

    buf[i..i + 4].copy_from_slice(&MAGIC.to_le_bytes());
    i += 4;

    let gw_bytes = cfg.gateway_id.as_bytes();
    let gw_len = gw_bytes.len().min(GATEWAY_ID_CAP);
    buf[i] = gw_len as u8;
    i += 1;
    buf[i..i + gw_len].copy_from_slice(&gw_bytes[..gw_len]);
    i += GATEWAY_ID_CAP;

    buf[i] = cfg.schedule.on_hour;
    buf[i + 1] = cfg.schedule.on_min;
    buf[i + 2] = cfg.schedule.off_hour;
    buf[i + 3] = cfg.schedule.off_min;
    i += 4;

    buf[i..i + 4].copy_from_slice(&cfg.register_interval_ms.to_le_bytes());
    i += 4;
    buf[i..i + 4].copy_from_slice(&cfg.status_interval_ms.to_le_bytes());
    i += 4;

    buf[i] = cfg.configured as u8;
    i += 1;
    buf[i] = control_mode_to_byte(cfg.control_mode);
    i += 1;
    buf[i] = cfg.light_state as u8;
    i += 1;

    let crc = CRC16.checksum(&buf[..i]);
    buf[i..i + 2].copy_from_slice(&crc.to_le_bytes());

    buf
}

fn decode_record(buf: &[u8; RECORD_LEN]) -> Option<NodeConfig> {
    let magic = u32::from_le_bytes(buf[0..4].try_into().ok()?);
    if magic != MAGIC {
        return None;
    }

    let crc_stored = u16::from_le_bytes(buf[RECORD_LEN - 2..RECORD_LEN].try_into().ok()?);
    let crc_computed = CRC16.checksum(&buf[..RECORD_LEN - 2]);
    if crc_stored != crc_computed {
        return None;
    }

    let mut i = 4;
    let gw_len = buf[i] as usize;
    i += 1;
    if gw_len > GATEWAY_ID_CAP {
        return None;
    }
    let mut gateway_id = GatewayId::new();
    let gw_str = core::str::from_utf8(&buf[i..i + gw_len]).ok()?;
    gateway_id.push_str(gw_str).ok()?;
    i += GATEWAY_ID_CAP;

    let schedule = Schedule {
        on_hour: buf[i],
        on_min: buf[i + 1],
        off_hour: buf[i + 2],
        off_min: buf[i + 3],
    };
    i += 4;

    let register_interval_ms = u32::from_le_bytes(buf[i..i + 4].try_into().ok()?);
    i += 4;
    let status_interval_ms = u32::from_le_bytes(buf[i..i + 4].try_into().ok()?);
    i += 4;

    let configured = buf[i] != 0;
    i += 1;
    let control_mode = control_mode_from_byte(buf[i])?;
    i += 1;
    let light_state = buf[i] != 0;

    Some(NodeConfig {
        gateway_id,
        schedule,
        register_interval_ms,
        status_interval_ms,
        configured,
        control_mode,
        light_state,
    })
}

pub struct FlashStore<'a> {
    flash: &'a pac::FLASH,
}

impl<'a> FlashStore<'a> {
    pub fn new(flash: &'a pac::FLASH) -> Self {
        Self { flash }
    }

    fn unlock(&self) {
        if self.flash.cr().read().lock().bit_is_set() {
            self.flash.keyr().write(|w| unsafe { w.key().bits(0x4567_0123) });
            self.flash.keyr().write(|w| unsafe { w.key().bits(0xCDEF_89AB) });
        }
    }

    fn wait_ready(&self) {
        while self.flash.sr().read().bsy().bit_is_set() {}
    }

    fn erase_sector(&self) {
        self.unlock();
        self.wait_ready();
        self.flash.cr().modify(|_, w| unsafe {
            w.ser().set_bit().snb().bits(CONFIG_SECTOR).psize().bits(0b01)
        });
        self.flash.cr().modify(|_, w| w.strt().set_bit());
        self.wait_ready();
        self.flash.cr().modify(|_, w| w.ser().clear_bit());
    }

    fn program_bytes(&self, bytes: &[u8]) {
        self.unlock();
        self.wait_ready();
        self.flash.cr().modify(|_, w| unsafe { w.pg().set_bit().psize().bits(0b00) });
        for (offset, chunk) in bytes.chunks(1).enumerate() {
            let addr = (CONFIG_SECTOR_ADDR + offset as u32) as *mut u8;
            unsafe { core::ptr::write_volatile(addr, chunk[0]) };
            self.wait_ready();
        }
        self.flash.cr().modify(|_, w| w.pg().clear_bit());
    }

    fn read_bytes(&self) -> [u8; RECORD_LEN] {
        let mut out = [0u8; RECORD_LEN];
        let src = CONFIG_SECTOR_ADDR as *const u8;
        for (i, b) in out.iter_mut().enumerate() {
            *b = unsafe { core::ptr::read_volatile(src.add(i)) };
        }
        out
    }
}

impl<'a> ConfigStore<NodeConfig> for FlashStore<'a> {
    fn load(&mut self) -> Result<NodeConfig, StoreError> {
        let raw = self.read_bytes();
        decode_record(&raw).ok_or(StoreError::NotFound)
    }

    fn save(&mut self, value: &NodeConfig) -> Result<(), StoreError> {
        self.erase_sector();
        let record = encode_record(value);
        self.program_bytes(&record);
        let verify = self.read_bytes();
        if verify == record {
            Ok(())
        } else {
            Err(StoreError::Io)
        }
    }
}
