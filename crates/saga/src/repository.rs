use std::marker::PhantomData;
use std::sync::Arc;

use event_store::SagaStore;
use serde::{Serialize, de::DeserializeOwned};

use crate::{Result, SagaContext};

/// Loads and saves the instances of one saga.
pub struct SagaRepository<T, Tx: Send> {
    saga_name: String,
    store: Arc<dyn SagaStore<Tx>>,
    _data: PhantomData<fn() -> T>,
}

impl<T, Tx> SagaRepository<T, Tx>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    Tx: Send + 'static,
{
    pub fn new(saga_name: impl Into<String>, store: Arc<dyn SagaStore<Tx>>) -> Self {
        Self {
            saga_name: saga_name.into(),
            store,
            _data: PhantomData,
        }
    }

    pub async fn load(&self, tx: &mut Tx, id: &str) -> Result<Option<SagaContext<T>>> {
        match self.store.load(tx, &self.saga_name, id).await? {
            Some(record) => Ok(Some(SagaContext::from_record(record)?)),
            None => Ok(None),
        }
    }

    pub async fn save(&self, tx: &mut Tx, context: &SagaContext<T>) -> Result<()> {
        let record = context.to_record(&self.saga_name)?;
        self.store.save(tx, &record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::{Database, MemoryDatabase, MemoryTx};

    #[tokio::test]
    async fn instances_are_scoped_by_saga_name() {
        let db = Arc::new(MemoryDatabase::new());
        let orders: SagaRepository<Vec<String>, MemoryTx> =
            SagaRepository::new("ordering.CreateOrder", db.clone());
        let baskets: SagaRepository<Vec<String>, MemoryTx> =
            SagaRepository::new("baskets.Checkout", db.clone());

        let mut context = SagaContext::new("o-1", vec!["sku-1".to_string()]);
        context.step = 1;

        let mut tx = db.begin().await.unwrap();
        orders.save(&mut tx, &context).await.unwrap();
        db.commit(tx).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        let loaded = orders.load(&mut tx, "o-1").await.unwrap();
        let other = baskets.load(&mut tx, "o-1").await.unwrap();
        db.rollback(tx).await.unwrap();

        assert_eq!(loaded, Some(context));
        assert_eq!(other, None);
    }
}
