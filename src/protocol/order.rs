//! The ORDER token (§4.2): announces which result-set columns the rows are physically ordered
//! by (e.g. after an `ORDER BY` the optimizer satisfied via an index).

use bytes::{Buf, Bytes};

use crate::error::Error;

#[derive(Debug, Clone)]
pub(crate) struct Order {
    pub(crate) column_indexes: Vec<u16>,
}

impl Order {
    pub(crate) fn get(buf: &mut Bytes) -> Result<Self, Error> {
        let length = buf.get_u16_le() as usize;
        let count = length / 2;

        let mut column_indexes = Vec::with_capacity(count);
        for _ in 0..count {
            column_indexes.push(buf.get_u16_le());
        }

        Ok(Self { column_indexes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_column_indexes() {
        let mut buf = Vec::new();
        buf.extend(4u16.to_le_bytes());
        buf.extend(0u16.to_le_bytes());
        buf.extend(2u16.to_le_bytes());

        let mut bytes = Bytes::from(buf);
        let order = Order::get(&mut bytes).unwrap();
        assert_eq!(order.column_indexes, vec![0, 2]);
    }
}
