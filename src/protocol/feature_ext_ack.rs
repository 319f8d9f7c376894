//! The FEATUREEXTACK token (§4.3): the server's acknowledgment of the features the client
//! requested in LOGIN7's feature-extension block. Its presence (or absence) after LOGINACK is
//! how the connection director learns whether Always Encrypted is actually available.

use bytes::{Buf, Bytes};

use crate::error::Error;

const TERMINATOR: u8 = 0xFF;

pub(crate) const FEATURE_ID_SESSION_RECOVERY: u8 = 0x01;
pub(crate) const FEATURE_ID_FEDAUTH: u8 = 0x02;
pub(crate) const FEATURE_ID_COLUMN_ENCRYPTION: u8 = 0x04;

#[derive(Debug, Clone)]
pub(crate) struct FeatureAck {
    pub(crate) feature_id: u8,
    pub(crate) data: Bytes,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FeatureExtAck {
    pub(crate) features: Vec<FeatureAck>,
}

impl FeatureExtAck {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let mut features = Vec::new();

        loop {
            let feature_id = buf.get_u8();
            if feature_id == TERMINATOR {
                break;
            }

            let data_len = buf.get_u32_le() as usize;
            let data = buf.split_to(data_len);
            features.push(FeatureAck { feature_id, data });
        }

        Ok(Self { features })
    }

    pub(crate) fn has(&self, feature_id: u8) -> bool {
        self.features.iter().any(|f| f.feature_id == feature_id)
    }
}
