use serde::{Deserialize, Serialize};

use crate::error::OicError;

pub const MIN_HEADER_OPTION_ID: u16 = 2048;
pub const MAX_HEADER_OPTION_ID: u16 = 3000;
/// Vendor options carried per message.
pub const MAX_HEADER_OPTIONS: usize = 2;
pub const MAX_HEADER_OPTION_DATA_LENGTH: usize = 16;

/// Vendor-specific protocol extension carried beside a request or response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderOption {
    option_id: u16,
    option_data: String,
}

impl HeaderOption {
    pub fn new(option_id: u16, option_data: impl Into<String>) -> Result<Self, OicError> {
        let option = Self {
            option_id,
            option_data: option_data.into(),
        };
        option.validate()?;
        Ok(option)
    }

    pub fn option_id(&self) -> u16 {
        self.option_id
    }

    pub fn option_data(&self) -> &str {
        &self.option_data
    }

    /// Re-checks id range and data length; used after decoding.
    pub fn validate(&self) -> Result<(), OicError> {
        if !(MIN_HEADER_OPTION_ID..=MAX_HEADER_OPTION_ID).contains(&self.option_id) {
            return Err(OicError::InvalidParam("header option id out of range"));
        }
        if self.option_data.len() > MAX_HEADER_OPTION_DATA_LENGTH {
            return Err(OicError::InvalidParam("header option data too long"));
        }
        Ok(())
    }
}

pub fn validate_header_options(options: &[HeaderOption]) -> Result<(), OicError> {
    if options.len() > MAX_HEADER_OPTIONS {
        return Err(OicError::InvalidParam("too many header options"));
    }
    options.iter().try_for_each(HeaderOption::validate)
}
