use crate::domain::{is_public_address, NetworkAddress, PeerId, Record, ValidationError};
use crate::ports::{AddressClassifier, RecordValidator};

/// Namespace prefix of public key records.
const PUBLIC_KEY_NAMESPACE: &[u8] = b"/pk/";

/// Classifies addresses by IP range.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicAddressClassifier;

impl AddressClassifier for PublicAddressClassifier {
    fn is_public(&self, addr: &NetworkAddress) -> bool {
        is_public_address(addr)
    }
}

/// Validates records by key namespace.
///
/// Only the `/pk/<peer id>` namespace is understood: its value must be a
/// public key hashing to the peer id in the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRecordValidator;

impl RecordValidator for DefaultRecordValidator {
    fn validate(&self, key: &[u8], record: &Record) -> Result<(), ValidationError> {
        if record.key != key {
            return Err(ValidationError::InvalidRecord(
                "record key does not match requested key".into(),
            ));
        }

        let Some(id_bytes) = key.strip_prefix(PUBLIC_KEY_NAMESPACE) else {
            return Err(ValidationError::InvalidRecord(
                "no validator for key namespace".into(),
            ));
        };

        let claimed = PeerId::from_bytes(id_bytes)?;
        if PeerId::from_public_key(&record.value) != claimed {
            return Err(ValidationError::PublicKeyMismatch);
        }
        Ok(())
    }
}
