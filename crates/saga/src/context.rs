use serde::{Serialize, de::DeserializeOwned};

use event_store::SagaRecord;

use crate::{Result, SagaState};

/// A running saga instance.
///
/// `step` is the index of the step whose command is outstanding. It starts
/// at -1, before the first step, and only moves forward while not
/// compensating and only backward while compensating.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaContext<T> {
    pub id: String,
    pub data: T,
    pub step: i64,
    pub done: bool,
    pub compensating: bool,
}

impl<T> SagaContext<T> {
    pub fn new(id: impl Into<String>, data: T) -> Self {
        Self {
            id: id.into(),
            data,
            step: -1,
            done: false,
            compensating: false,
        }
    }

    pub fn state(&self) -> SagaState {
        SagaState::from_flags(self.done, self.compensating)
    }

    /// +1 going forward, -1 while compensating.
    pub(crate) fn direction(&self) -> i64 {
        if self.compensating { -1 } else { 1 }
    }
}

impl<T: Serialize + DeserializeOwned> SagaContext<T> {
    pub(crate) fn to_record(&self, saga_name: &str) -> Result<SagaRecord> {
        Ok(SagaRecord {
            saga_name: saga_name.to_string(),
            id: self.id.clone(),
            data: serde_json::to_value(&self.data)?,
            step: self.step,
            done: self.done,
            compensating: self.compensating,
        })
    }

    pub(crate) fn from_record(record: SagaRecord) -> Result<Self> {
        Ok(Self {
            id: record.id,
            data: serde_json::from_value(record.data)?,
            step: record.step,
            done: record.done,
            compensating: record.compensating,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Data {
        order_id: String,
    }

    #[test]
    fn starts_before_the_first_step() {
        let context = SagaContext::new("o-1", ());
        assert_eq!(context.step, -1);
        assert_eq!(context.state(), SagaState::Running);
        assert_eq!(context.direction(), 1);
    }

    #[test]
    fn record_keeps_every_field() {
        let mut context = SagaContext::new(
            "o-1",
            Data {
                order_id: "o-1".to_string(),
            },
        );
        context.step = 2;
        context.compensating = true;

        let record = context.to_record("ordering.CreateOrder").unwrap();
        assert_eq!(record.saga_name, "ordering.CreateOrder");
        assert_eq!(record.data, serde_json::json!({ "order_id": "o-1" }));

        let restored = SagaContext::<Data>::from_record(record).unwrap();
        assert_eq!(restored, context);
        assert_eq!(restored.state(), SagaState::Compensating);
        assert_eq!(restored.direction(), -1);
    }
}
