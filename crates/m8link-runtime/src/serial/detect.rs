//! Device discovery over the host's serial ports.

use serde::Serialize;

use crate::error::LinkError;

/// USB vendor id of the device (Teensy).
pub const M8_VENDOR_ID: u16 = 0x16C0;
/// USB product ids the device enumerates with, firmware-dependent.
pub const M8_PRODUCT_IDS: [u16; 2] = [0x048A, 0x0489];

/// One enumerated serial port, as reported by `/api/ports`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub path: String,
    pub manufacturer: Option<String>,
    /// Lowercase hex, e.g. `"16c0"`; absent for non-USB ports.
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub is_m8: bool,
}

/// Enumerate every serial port, flagging the ones that look like the device.
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|port| match port.port_type {
            serialport::SerialPortType::UsbPort(usb) => {
                let is_m8 =
                    usb.vid == M8_VENDOR_ID && M8_PRODUCT_IDS.contains(&usb.pid);
                PortInfo {
                    path: port.port_name,
                    manufacturer: usb.manufacturer,
                    vendor_id: Some(format!("{:04x}", usb.vid)),
                    product_id: Some(format!("{:04x}", usb.pid)),
                    is_m8,
                }
            }
            _ => PortInfo {
                path: port.port_name,
                manufacturer: None,
                vendor_id: None,
                product_id: None,
                is_m8: false,
            },
        })
        .collect())
}

/// Path of the first port matching the device's vendor/product ids.
pub fn find_m8() -> Result<Option<String>, LinkError> {
    Ok(list_ports()?
        .into_iter()
        .find(|port| port.is_m8)
        .map(|port| port.path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_info_serializes_camel_case() {
        let info = PortInfo {
            path: "/dev/ttyACM0".into(),
            manufacturer: Some("DirtyWave".into()),
            vendor_id: Some("16c0".into()),
            product_id: Some("048a".into()),
            is_m8: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["vendorId"], "16c0");
        assert_eq!(json["isM8"], true);
    }
}
