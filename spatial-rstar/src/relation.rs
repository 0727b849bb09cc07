//! Data relations: ordered point collections addressable by object id.

use std::collections::HashMap;

use crate::rstar_tree::{ObjectId, SpatialError, SpatialResult};

/// Read access to the indexed data set.
///
/// The tree only uses [`Relation::ids`] during bulk load and
/// [`Relation::get`] for bulk load and by-id queries.
pub trait Relation {
    /// Dimensionality shared by every vector in the relation.
    fn dimensionality(&self) -> usize;

    /// Coordinates of `id`, `None` if the relation has no such object.
    fn get(&self, id: ObjectId) -> Option<&[f64]>;

    /// All ids in relation order.
    fn ids(&self) -> Box<dyn Iterator<Item = ObjectId> + '_>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory relation that keeps insertion order.
#[derive(Debug, Clone, Default)]
pub struct VectorRelation {
    dimensionality: usize,
    ids: Vec<ObjectId>,
    rows: Vec<Vec<f64>>,
    offsets: HashMap<ObjectId, usize>,
}

impl VectorRelation {
    pub fn new(dimensionality: usize) -> Self {
        Self {
            dimensionality,
            ..Default::default()
        }
    }

    /// Builds a relation whose ids are the row positions `0..n`.
    pub fn from_rows(dimensionality: usize, rows: Vec<Vec<f64>>) -> SpatialResult<Self> {
        let mut relation = Self::new(dimensionality);
        for (i, row) in rows.into_iter().enumerate() {
            relation.push(i as ObjectId, row)?;
        }
        Ok(relation)
    }

    /// Appends a vector under `id`.
    ///
    /// # Errors
    ///
    /// Fails on a dimensionality mismatch or a duplicate id.
    pub fn push(&mut self, id: ObjectId, row: Vec<f64>) -> SpatialResult<()> {
        if row.len() != self.dimensionality {
            return Err(SpatialError::DimensionMismatch {
                expected: self.dimensionality,
                actual: row.len(),
            });
        }
        if self.offsets.contains_key(&id) {
            return Err(SpatialError::InvalidOperation(format!(
                "duplicate object id {} in relation",
                id
            )));
        }
        self.offsets.insert(id, self.rows.len());
        self.ids.push(id);
        self.rows.push(row);
        Ok(())
    }

    /// `(id, coordinates)` pairs in relation order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &[f64])> + '_ {
        self.ids
            .iter()
            .zip(self.rows.iter())
            .map(|(id, row)| (*id, row.as_slice()))
    }
}

impl Relation for VectorRelation {
    fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    fn get(&self, id: ObjectId) -> Option<&[f64]> {
        self.offsets.get(&id).map(|&i| self.rows[i].as_slice())
    }

    fn ids(&self) -> Box<dyn Iterator<Item = ObjectId> + '_> {
        Box::new(self.ids.iter().copied())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
