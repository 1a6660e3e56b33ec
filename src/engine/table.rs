use std::cmp::Ordering;
use std::marker::PhantomData;
use serde_json::{Map, Value};
use crate::model::Entity;
use crate::{EntityStore, Error, Result};

/// A typed view over one entity table of an [`EntityStore`].
pub struct Table<'a, T> {
    store: &'a dyn EntityStore,
    _marker: PhantomData<T>,
}

impl<'a, T: Entity> Table<'a, T> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store, _marker: PhantomData }
    }

    pub async fn get(&self, id: &str) -> Result<T> {
        let value = self.store.get(T::TABLE, id).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn list(&self) -> Result<Vec<T>> {
        decode_all(self.store.list(T::TABLE).await?)
    }

    /// Lists the table ordered by a field: `"score"` ascending, `"-score"` descending.
    pub async fn list_sorted(&self, order: &str) -> Result<Vec<T>> {
        let mut records = self.store.list(T::TABLE).await?;
        let (field, descending) = match order.strip_prefix('-') {
            Some(field) => (field, true),
            None => (order, false),
        };
        records.sort_by(|a, b| {
            let ord = compare_values(&a[field], &b[field]);
            if descending { ord.reverse() } else { ord }
        });
        decode_all(records)
    }

    /// Records whose fields equal every field of `query` (a JSON object).
    pub async fn filter(&self, query: Value) -> Result<Vec<T>> {
        let query = as_object(query)?;
        decode_all(self.store.filter(T::TABLE, &query).await?)
    }

    pub async fn find_one(&self, query: Value) -> Result<Option<T>> {
        Ok(self.filter(query).await?.into_iter().next())
    }

    /// Inserts `entity`. An empty id is replaced by a generated one.
    pub async fn create(&self, entity: &T) -> Result<T> {
        let mut value = serde_json::to_value(entity)?;
        if let Value::Object(fields) = &mut value {
            if fields.get("id").and_then(Value::as_str).is_some_and(str::is_empty) {
                fields.remove("id");
            }
        }
        let stored = self.store.create(T::TABLE, value).await?;
        Ok(serde_json::from_value(stored)?)
    }

    pub async fn update(&self, id: &str, patch: Value) -> Result<T> {
        let stored = self.store.update(T::TABLE, id, patch).await?;
        Ok(serde_json::from_value(stored)?)
    }

    /// Writes every field of `entity` over the stored record with the same id.
    pub async fn save(&self, entity: &T) -> Result<T> {
        self.update(entity.id(), serde_json::to_value(entity)?).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(T::TABLE, id).await
    }
}

fn decode_all<T: Entity>(records: Vec<Value>) -> Result<Vec<T>> {
    records.into_iter()
        .map(|r| serde_json::from_value(r).map_err(Error::from))
        .collect()
}

fn as_object(query: Value) -> Result<Map<String, Value>> {
    match query {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(Error::InvalidRequest("query must be a JSON object".to_string())),
    }
}

/// Orders JSON scalars: missing/null first, then numbers, then strings, then booleans.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Bool(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
