/// Description of one result column as carried in the buffer header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDesc {
    pub name: String,
    pub sql_type: i16,
    pub nullable: bool,
    pub declared_size: u32,
}

/// In-memory result set (or stream chunk) before wire encoding.
/// Cells are already in their wire representation; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub columns: Vec<ColumnDesc>,
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
}

impl RowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_column(&mut self, name: String, sql_type: i16, nullable: bool, declared_size: u32) {
        self.columns.push(ColumnDesc {
            name,
            sql_type,
            nullable,
            declared_size,
        });
    }

    pub fn add_row(&mut self, row: Vec<Option<Vec<u8>>>) {
        self.rows.push(row);
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Same columns, no rows. Used by stream chunks so every chunk repeats
    /// the full metadata and parses on its own.
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }
}
