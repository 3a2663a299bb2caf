use oic_core::types::{DEFAULT_INTERFACE, DEVICE_RESOURCE_TYPE, DEVICE_URI, PLATFORM_RESOURCE_TYPE, PLATFORM_URI};
use oic_core::{OicError, Representation};

/// OIC core version advertised on `/oic/d`.
pub const CORE_VERSION: &str = "0.9.0";
/// Data model version advertised on `/oic/d`.
pub const DATA_MODEL_VERSION: &str = "sec.0.95";
pub const MAX_MANUFACTURER_NAME_LENGTH: usize = 16;
pub const MAX_MANUFACTURER_URL_LENGTH: usize = 32;

/// Device description served on `/oic/d`. The device id is assigned by the
/// platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_name: String,
}

impl DeviceInfo {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }

    pub fn validate(&self) -> Result<(), OicError> {
        if self.device_name.is_empty() {
            return Err(OicError::InvalidParam("device name is required"));
        }
        Ok(())
    }

    pub fn to_representation(&self, device_id: &str) -> Representation {
        let mut rep = base_representation(DEVICE_URI, DEVICE_RESOURCE_TYPE);
        rep.set_value("di", device_id);
        rep.set_value("n", self.device_name.as_str());
        rep.set_value("lcv", CORE_VERSION);
        rep.set_value("dmv", DATA_MODEL_VERSION);
        rep
    }
}

/// Platform description served on `/oic/p`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformInfo {
    pub platform_id: String,
    pub manufacturer_name: String,
    pub manufacturer_url: Option<String>,
    pub model_number: Option<String>,
    pub date_of_manufacture: Option<String>,
    pub platform_version: Option<String>,
    pub operating_system_version: Option<String>,
    pub hardware_version: Option<String>,
    pub firmware_version: Option<String>,
    pub support_url: Option<String>,
    pub system_time: Option<String>,
}

impl PlatformInfo {
    pub fn validate(&self) -> Result<(), OicError> {
        if self.platform_id.is_empty() {
            return Err(OicError::InvalidParam("platform id is required"));
        }
        if self.manufacturer_name.is_empty()
            || self.manufacturer_name.len() > MAX_MANUFACTURER_NAME_LENGTH
        {
            return Err(OicError::InvalidParam("manufacturer name length"));
        }
        if self
            .manufacturer_url
            .as_ref()
            .is_some_and(|url| url.len() > MAX_MANUFACTURER_URL_LENGTH)
        {
            return Err(OicError::InvalidParam("manufacturer url too long"));
        }
        Ok(())
    }

    pub fn to_representation(&self) -> Representation {
        let mut rep = base_representation(PLATFORM_URI, PLATFORM_RESOURCE_TYPE);
        rep.set_value("pi", self.platform_id.as_str());
        rep.set_value("mnmn", self.manufacturer_name.as_str());
        let optional = [
            ("mnml", &self.manufacturer_url),
            ("mnmo", &self.model_number),
            ("mndt", &self.date_of_manufacture),
            ("mnpv", &self.platform_version),
            ("mnos", &self.operating_system_version),
            ("mnhw", &self.hardware_version),
            ("mnfv", &self.firmware_version),
            ("mnsl", &self.support_url),
            ("st", &self.system_time),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                rep.set_value(key, value.as_str());
            }
        }
        rep
    }
}

fn base_representation(uri: &str, resource_type: &str) -> Representation {
    let mut rep = Representation::new();
    rep.set_uri(uri);
    // Both constants are valid identifiers.
    let _ = rep.add_resource_type(resource_type);
    let _ = rep.add_resource_interface(DEFAULT_INTERFACE);
    rep
}

#[cfg(test)]
mod tests {
    use super::{DeviceInfo, PlatformInfo, CORE_VERSION};

    fn platform() -> PlatformInfo {
        PlatformInfo {
            platform_id: "0A3E0D6F-DBF5-404E-8719-D6880042463A".into(),
            manufacturer_name: "acme".into(),
            manufacturer_url: Some("https://acme.example".into()),
            firmware_version: Some("1.2".into()),
            ..PlatformInfo::default()
        }
    }

    #[test]
    fn device_representation_carries_standard_keys() {
        let rep = DeviceInfo::new("kitchen").to_representation("abcd");
        assert_eq!(rep.uri(), "/oic/d");
        assert_eq!(rep.get_value::<String>("di").expect("di should be set"), "abcd");
        assert_eq!(rep.get_value::<String>("n").expect("n should be set"), "kitchen");
        assert_eq!(
            rep.get_value::<String>("lcv").expect("lcv should be set"),
            CORE_VERSION
        );
        assert_eq!(rep.resource_types(), ["oic.wk.d".to_string()]);
    }

    #[test]
    fn platform_representation_skips_unset_fields() {
        let rep = platform().to_representation();
        assert!(rep.has_attribute("mnfv"));
        assert!(!rep.has_attribute("mnos"));
        assert_eq!(rep.get_value::<String>("mnmn").expect("mnmn"), "acme");
    }

    #[test]
    fn platform_validation_enforces_lengths() {
        platform().validate().expect("sample platform should validate");

        let mut missing_id = platform();
        missing_id.platform_id.clear();
        assert!(missing_id.validate().is_err());

        let mut long_name = platform();
        long_name.manufacturer_name = "x".repeat(17);
        assert!(long_name.validate().is_err());

        let mut long_url = platform();
        long_url.manufacturer_url = Some("x".repeat(33));
        assert!(long_url.validate().is_err());
    }

    #[test]
    fn device_name_is_required() {
        assert!(DeviceInfo::default().validate().is_err());
    }
}
