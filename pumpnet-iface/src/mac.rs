use std::fmt;

/// Ethernet hardware address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
  /// Vendor prefix used for addresses derived from a device id.
  pub const DEVICE_OUI: [u8; 3] = [0x00, 0x80, 0xE1];

  /// Builds the default address of a device: the vendor prefix followed by
  /// the low 24 bits of its unique id.
  pub fn from_device_uid(uid: u32) -> Self {
    let [_, a, b, c] = uid.to_be_bytes();
    let [x, y, z] = Self::DEVICE_OUI;
    Self([x, y, z, a, b, c])
  }

  pub fn octets(self) -> [u8; 6] {
    self.0
  }

  /// All-zero address, meaning "not configured".
  pub fn is_unset(self) -> bool {
    self.0 == [0; 6]
  }
}

impl From<[u8; 6]> for MacAddr {
  fn from(value: [u8; 6]) -> Self {
    Self(value)
  }
}

impl fmt::Display for MacAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [a, b, c, d, e, g] = self.0;
    write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
  }
}

impl fmt::Debug for MacAddr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "MacAddr({self})")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_from_device_uid() {
    let mac = MacAddr::from_device_uid(0xDEAD_BEEF);
    assert_eq!(mac.octets(), [0x00, 0x80, 0xE1, 0xAD, 0xBE, 0xEF]);
    assert_eq!(mac.to_string(), "00:80:e1:ad:be:ef");
  }

  #[test]
  fn test_unset() {
    assert!(MacAddr::default().is_unset());
    assert!(!MacAddr::from_device_uid(0).is_unset());
  }
}
