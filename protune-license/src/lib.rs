//! Client side of the widevine license protocol.
//!
//! A [`Session`] turns initialization data into a signed license request and a
//! license response into content keys. Moving the bytes between the two is left
//! to the caller.
//!
//! ```no_run
//! use protune_license::{Device, Session};
//! use std::sync::Arc;
//!
//! # fn exchange(challenge: Vec<u8>) -> Vec<u8> { challenge }
//! # fn main() -> protune_license::Result<()> {
//! let device = Arc::new(Device::from_file("device.wvd")?);
//! let mut session = Session::open(device, "AAAAW3Bzc2gAAAAA7e+LqXnWSs6jyCfc1R0h7QAAADsIARIQ62dqu8s0Xpa7z2FmMPGj2hoNd2lkZXZpbmVfdGVzdCIQZmtqM2xqYVNkZmFsa3IzaioCSEQyAA==")?;
//! let challenge = session.build_request()?;
//! let keys = session.consume_response(&exchange(challenge))?;
//! session.close();
//!
//! for key in keys {
//!     println!("{}", key);
//! }
//! # Ok(())
//! # }
//! ```

pub mod license_protocol;

mod device;
mod error;
mod init_data;
mod keys;
mod session;

pub use device::{Device, DeviceType};
pub use error::{Error, Result};
pub use init_data::{InitData, WIDEVINE_SYSTEM_ID};
pub use keys::{ContentKey, DerivedKeys, KeyType, Permission};
pub use session::{LicenseType, ServiceCertificate, Session, SessionState, SignaturePolicy};
