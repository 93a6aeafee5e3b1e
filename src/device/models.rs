use std::fmt;

use serde::{Deserialize, Serialize};

/// Bus a serial port is attached through, as reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    Usb,
    Pci,
    Bluetooth,
    Unknown,
}

impl PortKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortKind::Usb => "usb",
            PortKind::Pci => "pci",
            PortKind::Bluetooth => "bluetooth",
            PortKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a port enumeration snapshot.
///
/// Snapshots are compared by value: two descriptors describe the same port
/// state when every field is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub name: String,
    pub display_name: String,
    pub kind: PortKind,
    /// `VVVV:PPPP` in upper-case hex, USB ports only.
    pub vendor_product_id: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl PortDescriptor {
    pub fn new(name: impl Into<String>, kind: PortKind) -> Self {
        let name = name.into();
        Self {
            display_name: format!("{} [{}]", name, kind),
            name,
            kind,
            vendor_product_id: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Convenience constructor for a USB port with a known vendor/product id.
    pub fn usb(name: impl Into<String>, vid: u16, pid: u16) -> Self {
        let mut port = Self::new(name, PortKind::Usb);
        port.vendor_product_id = Some(format!("{:04X}:{:04X}", vid, pid));
        port
    }

    pub fn is_usb(&self) -> bool {
        self.kind == PortKind::Usb
    }
}
