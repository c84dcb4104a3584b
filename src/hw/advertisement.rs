use std::collections::HashMap;

use tracing::trace;

use crate::protocol::ADVERTISEMENT_MANUFACTURER_ID;

const PAYLOAD_LEN: usize = 6;
const PAYLOAD_TYPE_PREFIX: [u8; 2] = [0x05, 0xFF];

/// Decodes the last-session timestamp the logger broadcasts in its advertisement.
pub struct AdvertisementDecoder;

impl AdvertisementDecoder {
    /// Looks up the logger payload in manufacturer data and decodes its timestamp.
    ///
    /// Returns `0` when the payload is absent or malformed, meaning "no signal".
    #[must_use]
    pub fn decode(manufacturer_data: &HashMap<u16, Vec<u8>>) -> u32 {
        manufacturer_data
            .get(&ADVERTISEMENT_MANUFACTURER_ID)
            .map_or(0, |payload| Self::decode_payload(payload))
    }

    /// Decodes one vendor payload.
    ///
    /// ```
    /// use pepperoni::AdvertisementDecoder;
    ///
    /// assert_eq!(1, AdvertisementDecoder::decode_payload(&[0x05, 0xFF, 0x01, 0x00, 0x00, 0x00]));
    /// assert_eq!(0, AdvertisementDecoder::decode_payload(&[0x04, 0xFF, 0x01, 0x00, 0x00, 0x00]));
    /// ```
    #[must_use]
    pub fn decode_payload(payload: &[u8]) -> u32 {
        let Ok(bytes) = <[u8; PAYLOAD_LEN]>::try_from(payload) else {
            trace!(
                payload = %hex::encode(payload),
                "ignoring advertisement payload with unexpected length"
            );
            return 0;
        };
        if bytes[..2] != PAYLOAD_TYPE_PREFIX {
            trace!(
                payload = %hex::encode(payload),
                "ignoring advertisement payload with unexpected type prefix"
            );
            return 0;
        }

        u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]])
    }
}
