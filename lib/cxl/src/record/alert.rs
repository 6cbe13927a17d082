//! Alert configuration records (Get 0x4201, Set 0x4202).

use super::{CodecError, le_accessors, wire_record};
use bitflags::bitflags;
use utils::endian::LittleEndian16;

bitflags! {
    /// One bit per alert class, shared by the valid/programmable/enable masks.
    pub struct AlertMask: u8 {
        const LIFE_USED                 = 1 << 0;
        const DEVICE_OVER_TEMPERATURE   = 1 << 1;
        const DEVICE_UNDER_TEMPERATURE  = 1 << 2;
        const CORRECTED_VOLATILE_ERROR  = 1 << 3;
        const CORRECTED_PMEM_ERROR      = 1 << 4;
    }
}

wire_record! {
    pub struct GetAlertConfig {
        pub valid_alerts: u8,
        pub programmable_alerts: u8,
        pub life_used_critical_threshold: u8,
        pub life_used_warning_threshold: u8,
        pub over_temperature_critical_threshold: LittleEndian16,
        pub under_temperature_critical_threshold: LittleEndian16,
        pub over_temperature_warning_threshold: LittleEndian16,
        pub under_temperature_warning_threshold: LittleEndian16,
        pub corrected_volatile_warning_threshold: LittleEndian16,
        pub corrected_pmem_warning_threshold: LittleEndian16,
    } = 16;
}

le_accessors!(GetAlertConfig {
    over_temperature_critical_threshold: u16,
    under_temperature_critical_threshold: u16,
    over_temperature_warning_threshold: u16,
    under_temperature_warning_threshold: u16,
    corrected_volatile_warning_threshold: u16,
    corrected_pmem_warning_threshold: u16,
});

impl GetAlertConfig {
    pub fn valid(&self) -> AlertMask {
        AlertMask::from_bits_truncate(self.valid_alerts)
    }

    pub fn programmable(&self) -> AlertMask {
        AlertMask::from_bits_truncate(self.programmable_alerts)
    }
}

wire_record! {
    pub struct SetAlertConfig {
        pub valid_alert_actions: u8,
        pub enable_alert_actions: u8,
        pub life_used_warning_threshold: u8,
        pub rsvd: u8,
        pub over_temperature_warning_threshold: LittleEndian16,
        pub under_temperature_warning_threshold: LittleEndian16,
        pub corrected_volatile_warning_threshold: LittleEndian16,
        pub corrected_pmem_warning_threshold: LittleEndian16,
    } = 12;
}

le_accessors!(SetAlertConfig {
    over_temperature_warning_threshold: u16,
    under_temperature_warning_threshold: u16,
    corrected_volatile_warning_threshold: u16,
    corrected_pmem_warning_threshold: u16,
});

impl SetAlertConfig {
    pub fn new() -> Self {
        <Self as super::Record>::zeroed()
    }

    /// Enable warnings for `alert` at `threshold`. The life-used threshold is a one-byte
    /// percentage.
    pub fn enable(mut self, alert: AlertMask, threshold: u16) -> Result<Self, CodecError> {
        if alert.contains(AlertMask::LIFE_USED) {
            self.life_used_warning_threshold = u8::try_from(threshold)
                .map_err(|_| CodecError::Invalid("life-used threshold exceeds one byte"))?;
        }
        self.valid_alert_actions |= alert.bits();
        self.enable_alert_actions |= alert.bits();
        self.set_threshold(alert, threshold);
        Ok(self)
    }

    /// Disable warnings for `alert`.
    pub fn disable(mut self, alert: AlertMask) -> Self {
        self.valid_alert_actions |= alert.bits();
        self.enable_alert_actions &= !alert.bits();
        self
    }

    fn set_threshold(&mut self, alert: AlertMask, threshold: u16) {
        if alert.contains(AlertMask::DEVICE_OVER_TEMPERATURE) {
            self.set_over_temperature_warning_threshold(threshold);
        }
        if alert.contains(AlertMask::DEVICE_UNDER_TEMPERATURE) {
            self.set_under_temperature_warning_threshold(threshold);
        }
        if alert.contains(AlertMask::CORRECTED_VOLATILE_ERROR) {
            self.set_corrected_volatile_warning_threshold(threshold);
        }
        if alert.contains(AlertMask::CORRECTED_PMEM_ERROR) {
            self.set_corrected_pmem_warning_threshold(threshold);
        }
    }
}

impl Default for SetAlertConfig {
    fn default() -> Self {
        Self::new()
    }
}
