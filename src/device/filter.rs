//! Device allow/deny filtering
//!
//! Filters are evaluated in list order. Any matching exclude filter ends
//! evaluation with a rejection, even when an earlier include filter already
//! matched. An empty list accepts everything.

use serde::{Deserialize, Serialize};

use super::info::Device;

/// A single device filter rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceFilter {
    /// Free-form note for config files, ignored by matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Vendor id to match, `None` or 0 matches any vendor
    pub vendor_id: Option<u16>,
    /// Product id to match, `None` or 0 matches any product
    pub product_id: Option<u16>,
    /// Substring of the device name, `None` or empty matches any name
    pub name: Option<String>,
    /// Treat a match as a rejection
    pub exclude: bool,
}

impl DeviceFilter {
    /// Include filter for a vendor/product pair
    pub fn include(vendor_id: u16, product_id: Option<u16>) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id,
            ..Default::default()
        }
    }

    /// Exclude filter for a vendor/product pair
    pub fn exclude(vendor_id: u16, product_id: Option<u16>) -> Self {
        Self {
            exclude: true,
            ..Self::include(vendor_id, product_id)
        }
    }

    /// Whether this rule matches the device, ignoring `exclude`
    pub fn matches(&self, device: &Device) -> bool {
        let vid_ok = match self.vendor_id {
            None | Some(0) => true,
            Some(vid) => vid == device.vendor_id,
        };
        let pid_ok = match self.product_id {
            None | Some(0) => true,
            Some(pid) => pid == device.product_id,
        };
        let name_ok = match self.name.as_deref() {
            None | Some("") => true,
            // Devices that report no name cannot be ruled out by name
            Some(_) if device.name.is_empty() => true,
            Some(name) => device.name.contains(name),
        };
        vid_ok && pid_ok && name_ok
    }
}

/// Outcome of evaluating a filter list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// The list is empty
    NoFilters,
    /// Include filter at this index matched and no exclude filter did
    Included(usize),
    /// Exclude filter at this index matched
    Excluded(usize),
    /// Nothing matched
    NoMatch,
}

impl FilterDecision {
    /// Evaluate `filters` against `device`
    pub fn evaluate(device: &Device, filters: &[DeviceFilter]) -> Self {
        if filters.is_empty() {
            return Self::NoFilters;
        }

        let mut included = None;
        for (index, filter) in filters.iter().enumerate() {
            if !filter.matches(device) {
                continue;
            }
            if filter.exclude {
                return Self::Excluded(index);
            }
            included.get_or_insert(index);
        }

        match included {
            Some(index) => Self::Included(index),
            None => Self::NoMatch,
        }
    }

    pub fn accepted(&self) -> bool {
        matches!(self, Self::NoFilters | Self::Included(_))
    }
}

/// Whether `device` passes `filters`
pub fn matches(device: &Device, filters: &[DeviceFilter]) -> bool {
    FilterDecision::evaluate(device, filters).accepted()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;

    fn device(vid: u16, pid: u16, name: &str) -> Device {
        Device::from(DeviceDescriptor {
            id: 7,
            vendor_id: vid,
            product_id: pid,
            name: name.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_filters_accept() {
        let d = device(100, 1, "cam");
        assert!(matches(&d, &[]));
        assert_eq!(FilterDecision::evaluate(&d, &[]), FilterDecision::NoFilters);
    }

    #[test]
    fn test_exclude_overrides_include() {
        let d = device(100, 1, "cam");
        let filters = vec![
            DeviceFilter::include(100, None),
            DeviceFilter::exclude(100, None),
        ];
        assert!(!matches(&d, &filters));
        assert_eq!(
            FilterDecision::evaluate(&d, &filters),
            FilterDecision::Excluded(1)
        );
    }

    #[test]
    fn test_exclude_first_short_circuits() {
        let d = device(100, 1, "cam");
        let filters = vec![
            DeviceFilter::exclude(100, Some(1)),
            DeviceFilter::include(100, None),
        ];
        assert_eq!(
            FilterDecision::evaluate(&d, &filters),
            FilterDecision::Excluded(0)
        );
    }

    #[test]
    fn test_include_any_of() {
        let d = device(200, 5, "cam");
        let filters = vec![
            DeviceFilter::include(100, None),
            DeviceFilter::include(200, Some(5)),
        ];
        assert_eq!(
            FilterDecision::evaluate(&d, &filters),
            FilterDecision::Included(1)
        );
        assert!(!matches(&device(300, 5, "cam"), &filters));
    }

    #[test]
    fn test_non_matching_exclude_is_ignored() {
        let d = device(100, 1, "cam");
        let filters = vec![
            DeviceFilter::include(100, None),
            DeviceFilter::exclude(100, Some(2)),
        ];
        assert!(matches(&d, &filters));
    }

    #[test]
    fn test_only_excludes_rejects_rest() {
        let filters = vec![DeviceFilter::exclude(100, None)];
        assert!(!matches(&device(200, 1, "cam"), &filters));
    }

    #[test]
    fn test_zero_ids_are_wildcards() {
        let filter = DeviceFilter {
            vendor_id: Some(0),
            product_id: Some(0),
            ..Default::default()
        };
        assert!(filter.matches(&device(1234, 5678, "x")));
    }

    #[test]
    fn test_name_matching() {
        let filter = DeviceFilter {
            name: Some("THETA".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&device(1, 1, "RICOH THETA V")));
        assert!(!filter.matches(&device(1, 1, "HD Webcam")));
        assert!(filter.matches(&device(1, 1, "")));
    }
}
