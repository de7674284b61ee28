// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::queue::EventRecord;

/// Records drained together and delivered as one unit, in enqueue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: u64,
    records: Vec<EventRecord>,
}

impl Batch {
    #[must_use]
    pub fn new(id: u64, records: Vec<EventRecord>) -> Self {
        Self { id, records }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Newline-delimited concatenation of the records.
    #[must_use]
    pub fn to_payload(&self) -> Vec<u8> {
        let size = self.records.iter().map(|r| r.len() + 1).sum::<usize>();
        let mut payload = Vec::with_capacity(size);
        for (i, record) in self.records.iter().enumerate() {
            if i > 0 {
                payload.push(b'\n');
            }
            payload.extend_from_slice(record);
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_payload_joins_records_in_order() {
        let batch = Batch::new(
            7,
            vec![
                Bytes::from_static(b"{\"type\":\"platform.start\"}"),
                Bytes::from_static(b"{\"type\":\"function\"}"),
            ],
        );
        assert_eq!(batch.id(), 7);
        assert_eq!(batch.len(), 2);
        assert_eq!(
            batch.to_payload(),
            b"{\"type\":\"platform.start\"}\n{\"type\":\"function\"}".to_vec()
        );
    }

    #[test]
    fn test_empty_batch_payload() {
        let batch = Batch::new(0, Vec::new());
        assert!(batch.is_empty());
        assert!(batch.to_payload().is_empty());
    }
}
