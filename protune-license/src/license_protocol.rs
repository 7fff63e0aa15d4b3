//! Subset of the widevine `license_protocol.proto` messages used by the client.
//!
//! Field numbers and types follow the published proto2 definitions. Fields the
//! client never reads or writes are left out, prost skips them while decoding.

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedMessage {
    #[prost(enumeration = "MessageType", optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub msg: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub session_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub remote_attestation: Option<Vec<u8>>,
    #[prost(int32, optional, tag = "8")]
    pub session_key_type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub oemcrypto_core_message: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    LicenseRequest = 1,
    License = 2,
    ErrorResponse = 3,
    ServiceCertificateRequest = 4,
    ServiceCertificate = 5,
    SubLicense = 6,
    CasLicenseRequest = 7,
    CasLicense = 8,
    ExternalLicenseRequest = 9,
    ExternalLicense = 10,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LicenseRequest {
    #[prost(message, optional, tag = "1")]
    pub client_id: Option<ClientIdentification>,
    #[prost(message, optional, tag = "2")]
    pub content_id: Option<ContentIdentification>,
    #[prost(enumeration = "RequestType", optional, tag = "3")]
    pub r#type: Option<i32>,
    #[prost(int64, optional, tag = "4")]
    pub request_time: Option<i64>,
    #[prost(enumeration = "ProtocolVersion", optional, tag = "6")]
    pub protocol_version: Option<i32>,
    #[prost(uint32, optional, tag = "7")]
    pub key_control_nonce: Option<u32>,
    #[prost(message, optional, tag = "8")]
    pub encrypted_client_id: Option<EncryptedClientIdentification>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RequestType {
    New = 1,
    Renewal = 2,
    Release = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtocolVersion {
    Version20 = 20,
    Version21 = 21,
    Version22 = 22,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LicenseType {
    Streaming = 1,
    Offline = 2,
    Automatic = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ContentIdentification {
    #[prost(oneof = "content_identification::ContentIdVariant", tags = "1")]
    pub content_id_variant: Option<content_identification::ContentIdVariant>,
}

pub mod content_identification {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WidevinePsshData {
        #[prost(bytes = "vec", repeated, tag = "1")]
        pub pssh_data: Vec<Vec<u8>>,
        #[prost(enumeration = "super::LicenseType", optional, tag = "2")]
        pub license_type: Option<i32>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub request_id: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum ContentIdVariant {
        #[prost(message, tag = "1")]
        WidevinePsshData(WidevinePsshData),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientIdentification {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub token: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub client_info: Vec<NameValue>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub provider_client_token: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub license_counter: Option<u32>,
    #[prost(message, optional, tag = "6")]
    pub client_capabilities: Option<ClientCapabilities>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub vmp_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct NameValue {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ClientCapabilities {
    #[prost(bool, optional, tag = "1")]
    pub client_token: Option<bool>,
    #[prost(bool, optional, tag = "2")]
    pub session_token: Option<bool>,
    #[prost(bool, optional, tag = "3")]
    pub video_resolution_constraints: Option<bool>,
    #[prost(int32, optional, tag = "4")]
    pub max_hdcp_version: Option<i32>,
    #[prost(uint32, optional, tag = "5")]
    pub oem_crypto_api_version: Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub anti_rollback_usage_table: Option<bool>,
    #[prost(uint32, optional, tag = "7")]
    pub srm_version: Option<u32>,
    #[prost(bool, optional, tag = "8")]
    pub can_update_srm: Option<bool>,
    #[prost(int32, repeated, packed = "false", tag = "9")]
    pub supported_certificate_key_type: Vec<i32>,
    #[prost(int32, optional, tag = "10")]
    pub analog_output_capabilities: Option<i32>,
    #[prost(bool, optional, tag = "11")]
    pub can_disable_analog_output: Option<bool>,
    #[prost(uint32, optional, tag = "12")]
    pub resource_rating_tier: Option<u32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct EncryptedClientIdentification {
    #[prost(string, optional, tag = "1")]
    pub provider_id: Option<String>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub service_certificate_serial_number: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub encrypted_client_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub encrypted_client_id_iv: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub encrypted_privacy_key: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct License {
    #[prost(message, optional, tag = "1")]
    pub id: Option<LicenseIdentification>,
    #[prost(message, repeated, tag = "3")]
    pub key: Vec<KeyContainer>,
    #[prost(int64, optional, tag = "4")]
    pub license_start_time: Option<i64>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct LicenseIdentification {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub request_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub session_id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub purchase_id: Option<Vec<u8>>,
    #[prost(enumeration = "LicenseType", optional, tag = "4")]
    pub r#type: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub version: Option<i32>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KeyContainer {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub id: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub iv: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub key: Option<Vec<u8>>,
    #[prost(enumeration = "key_container::KeyType", optional, tag = "4")]
    pub r#type: Option<i32>,
    #[prost(message, optional, tag = "9")]
    pub operator_session_key_permissions: Option<key_container::OperatorSessionKeyPermissions>,
}

pub mod key_container {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
    #[repr(i32)]
    pub enum KeyType {
        Signing = 1,
        Content = 2,
        KeyControl = 3,
        OperatorSession = 4,
        Entitlement = 5,
        OemContent = 6,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct OperatorSessionKeyPermissions {
        #[prost(bool, optional, tag = "1")]
        pub allow_encrypt: Option<bool>,
        #[prost(bool, optional, tag = "2")]
        pub allow_decrypt: Option<bool>,
        #[prost(bool, optional, tag = "3")]
        pub allow_sign: Option<bool>,
        #[prost(bool, optional, tag = "4")]
        pub allow_signature_verify: Option<bool>,
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedDrmCertificate {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub drm_certificate: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
    #[prost(message, optional, boxed, tag = "3")]
    pub signer: Option<Box<SignedDrmCertificate>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct DrmCertificate {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub serial_number: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "3")]
    pub creation_time_seconds: Option<u32>,
    /// PKCS#1 DER encoded RSA public key.
    #[prost(bytes = "vec", optional, tag = "4")]
    pub public_key: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "5")]
    pub system_id: Option<u32>,
    #[prost(string, optional, tag = "7")]
    pub provider_id: Option<String>,
}

/// Protection system data carried inside a widevine `pssh` box.
#[derive(Clone, PartialEq, prost::Message)]
pub struct WidevinePsshData {
    #[prost(int32, optional, tag = "1")]
    pub algorithm: Option<i32>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub key_ids: Vec<Vec<u8>>,
    #[prost(string, optional, tag = "3")]
    pub provider: Option<String>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub content_id: Option<Vec<u8>>,
    #[prost(string, optional, tag = "6")]
    pub policy: Option<String>,
    #[prost(uint32, optional, tag = "7")]
    pub crypto_period_index: Option<u32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub grouped_license: Option<Vec<u8>>,
    #[prost(uint32, optional, tag = "9")]
    pub protection_scheme: Option<u32>,
}
