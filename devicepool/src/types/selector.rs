// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The selector predicate used both at discovery filtering and at allocation matching.
//! `matches` must be pure — the Availability Queue's `poll` relies on being able to
//! rescan the same selector against the queue repeatedly without side effects.

use crate::types::{DeviceInfo, DeviceVariant, Serial};

/// The view of a device a [`Selector`] gets to inspect. Borrowed, never owned, so
/// matching never allocates.
#[derive(Debug, Clone, Copy)]
pub struct SelectableDevice<'a> {
    pub serial: &'a Serial,
    pub variant: &'a DeviceVariant,
    pub info: &'a DeviceInfo,
}

/// A predicate on devices plus metadata accessors, used both at discovery filtering and
/// at allocation matching.
pub trait Selector: Send + Sync + std::fmt::Debug {
    fn matches(&self, device: SelectableDevice<'_>) -> bool;
}

/// The default, field-based selector: every `Some` field must match; `None` fields are
/// wildcards. Also used to build the single-serial selector `force_allocate` polls with.
#[derive(Debug, Clone, Default)]
pub struct CriteriaSelector {
    pub serial: Option<Serial>,
    pub product: Option<String>,
    pub variant_label: Option<&'static str>,
    pub min_battery: Option<u8>,
}

impl CriteriaSelector {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn by_serial(serial: Serial) -> Self {
        Self {
            serial: Some(serial),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn serial(&self) -> Option<&Serial> {
        self.serial.as_ref()
    }

    #[must_use]
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    #[must_use]
    pub fn variant(&self) -> Option<&'static str> {
        self.variant_label
    }

    #[must_use]
    pub fn battery(&self) -> Option<u8> {
        self.min_battery
    }
}

impl Selector for CriteriaSelector {
    fn matches(&self, device: SelectableDevice<'_>) -> bool {
        if let Some(serial) = &self.serial
            && serial != device.serial
        {
            return false;
        }
        if let Some(product) = &self.product
            && device.info.product.as_deref() != Some(product.as_str())
        {
            return false;
        }
        if let Some(label) = self.variant_label
            && device.variant.label() != label
        {
            return false;
        }
        if let Some(min) = self.min_battery
            && device.info.battery.is_none_or(|b| b < min)
        {
            return false;
        }
        true
    }
}
