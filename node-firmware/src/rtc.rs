//! Real-time clock reads for the schedule engine.
//!
//! Reads the STM32F4 RTC time register directly rather than pulling in
//! a higher-level RTC crate, the same way the LoRa UART link pokes
//! `UART4`'s status register directly for error flags.

use stm32f4xx_hal::pac;

/// Performs the one-time RTC unlock/init-mode dance needed before the
/// time register can be trusted. If the backup domain was already
/// running (e.g. VBAT-backed across a reset), this is a no-op beyond
/// the register writes, which the RTC tolerates.
pub fn init(rtc: &pac::RTC, pwr: &pac::PWR) {
    pwr.cr().modify(|_, w| w.dbp().set_bit());
    rtc.wpr().write(|w| unsafe { w.key().bits(0xCA) });
    rtc.wpr().write(|w| unsafe { w.key().bits(0x53) });
}

/// Reads the current wall-clock hour/minute. Returns `None` if the RTC
/// has never been set (init-not-run flag clear); the schedule engine
/// treats that the same as any other RTC read failure.
pub fn now(rtc: &pac::RTC) -> Option<(u8, u8)> {
    if rtc.isr().read().inits().bit_is_clear() {
        return None;
    }
    let tr = rtc.tr().read();
    let hour = tr.ht().bits() * 10 + tr.hu().bits();
    let minute = tr.mnt().bits() * 10 + tr.mnu().bits();
    if hour > 23 || minute > 59 {
        None
    } else {
        Some((hour, minute))
    }
}
