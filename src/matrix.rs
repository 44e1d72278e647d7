use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{ItemClass, Snapshot};

/// Dense row-major score matrix. Every row has exactly `columns` cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: Vec<Vec<f64>>,
    columns: usize,
}

impl Matrix {
    pub fn zeros(rows: usize, columns: usize) -> Self {
        Self {
            rows: vec![vec![0.0; columns]; rows],
            columns,
        }
    }

    /// Returns `None` when the rows are ragged. Zero rows yields a 0x0 matrix.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Option<Self> {
        let columns = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != columns) {
            return None;
        }
        Some(Self { rows, columns })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns == 0
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.rows[row][column]
    }

    pub fn set(&mut self, row: usize, column: usize, value: f64) {
        self.rows[row][column] = value;
    }
}

/// Interaction matrix for one item class. Rows follow the snapshot's user
/// order; `items` maps columns back to item ids.
#[derive(Debug, Clone)]
pub struct ClassMatrix {
    pub class: ItemClass,
    pub items: Vec<Uuid>,
    pub matrix: Matrix,
    pub stale_interactions: usize,
}

pub fn build(snapshot: &Snapshot, class: ItemClass) -> ClassMatrix {
    let users = &snapshot.users;
    let items = snapshot.catalog(class).to_vec();

    let row_of: HashMap<Uuid, usize> = users.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let column_of: HashMap<Uuid, usize> =
        items.iter().enumerate().map(|(j, id)| (*id, j)).collect();

    let mut matrix = Matrix::zeros(users.len(), items.len());
    let mut stale_interactions = 0;

    for interaction in &snapshot.interactions {
        if interaction.target.class() != class {
            continue;
        }
        let Some(&row) = row_of.get(&interaction.user_id) else {
            continue;
        };
        match column_of.get(&interaction.target.id()) {
            Some(&column) => matrix.set(row, column, f64::from(interaction.score)),
            None => stale_interactions += 1,
        }
    }

    ClassMatrix {
        class,
        items,
        matrix,
        stale_interactions,
    }
}
