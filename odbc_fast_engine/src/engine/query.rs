use crate::engine::bind::to_driver_params;
use crate::error::{structured_from_driver, EngineError, Result};
use crate::protocol::{cell_kind_for, declared_size, sql_type_code, CellKind, ParamValue, RowSet};
use odbc_api::{ColumnDescription, Connection, Cursor, CursorRow, ResultSetMetadata};

/// Reads column metadata off an executed cursor into an empty `RowSet`,
/// plus the per-column extraction plan.
pub fn describe_columns<C: ResultSetMetadata>(cursor: &mut C) -> Result<(RowSet, Vec<CellKind>)> {
    let mut rows = RowSet::new();
    let mut kinds = Vec::new();

    let col_count = cursor.num_result_cols().map_err(driver_execute_error)?;
    let col_count: u16 = col_count
        .try_into()
        .map_err(|_| EngineError::Internal("negative column count".to_string()))?;

    let mut description = ColumnDescription::default();
    for col in 1..=col_count {
        cursor
            .describe_col(col, &mut description)
            .map_err(driver_execute_error)?;
        let name = description.name_to_string().unwrap_or_default();
        let code = sql_type_code(&description.data_type);
        rows.add_column(
            name,
            code,
            description.could_be_nullable(),
            declared_size(&description.data_type),
        );
        kinds.push(cell_kind_for(code));
    }

    Ok((rows, kinds))
}

/// Pulls up to `limit` rows from the cursor into `rows`. `None` means all.
/// Returns false once the cursor is exhausted.
pub fn fetch_rows<C: Cursor>(
    cursor: &mut C,
    rows: &mut RowSet,
    kinds: &[CellKind],
    limit: Option<usize>,
) -> Result<bool> {
    let mut fetched = 0;
    loop {
        if let Some(limit) = limit {
            if fetched >= limit {
                return Ok(true);
            }
        }
        let Some(mut row) = cursor.next_row().map_err(driver_execute_error)? else {
            return Ok(false);
        };
        let mut cells = Vec::with_capacity(kinds.len());
        for (idx, kind) in kinds.iter().enumerate() {
            let col: u16 = (idx + 1)
                .try_into()
                .map_err(|_| EngineError::Internal("column number overflow".to_string()))?;
            cells.push(read_cell(&mut row, col, *kind)?);
        }
        rows.add_row(cells);
        fetched += 1;
    }
}

/// Extracts one cell in its wire representation. Integer-family columns are
/// re-encoded as fixed-width little-endian; drivers that hand back
/// non-numeric text for them fall through to the raw text bytes.
pub fn read_cell(row: &mut CursorRow<'_>, col: u16, kind: CellKind) -> Result<Option<Vec<u8>>> {
    match kind {
        CellKind::Binary => {
            let mut buf = Vec::new();
            let present = row.get_binary(col, &mut buf).map_err(driver_execute_error)?;
            Ok(present.then_some(buf))
        }
        CellKind::Integer => {
            let Some(text) = read_text(row, col)? else {
                return Ok(None);
            };
            match std::str::from_utf8(&text).ok().and_then(|s| s.trim().parse::<i32>().ok()) {
                Some(v) => Ok(Some(v.to_le_bytes().to_vec())),
                None => Ok(Some(text)),
            }
        }
        CellKind::BigInt => {
            let Some(text) = read_text(row, col)? else {
                return Ok(None);
            };
            match std::str::from_utf8(&text).ok().and_then(|s| s.trim().parse::<i64>().ok()) {
                Some(v) => Ok(Some(v.to_le_bytes().to_vec())),
                None => Ok(Some(text)),
            }
        }
        CellKind::Text => read_text(row, col),
    }
}

fn read_text(row: &mut CursorRow<'_>, col: u16) -> Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let present = row.get_text(col, &mut buf).map_err(driver_execute_error)?;
    Ok(present.then_some(buf))
}

/// Executes one statement and drains its (sole) result set. Statements
/// without a cursor (DML/DDL) produce an empty `RowSet`.
pub fn run_statement(
    conn: &Connection<'static>,
    sql: &str,
    params: &[ParamValue],
    timeout_secs: Option<usize>,
) -> Result<RowSet> {
    let bound = to_driver_params(params);
    let cursor = conn
        .execute(sql, &bound[..], timeout_secs)
        .map_err(driver_execute_error)?;

    match cursor {
        Some(mut cursor) => {
            let (mut rows, kinds) = describe_columns(&mut cursor)?;
            fetch_rows(&mut cursor, &mut rows, &kinds, None)?;
            Ok(rows)
        }
        None => Ok(RowSet::new()),
    }
}

fn driver_execute_error(err: odbc_api::Error) -> EngineError {
    EngineError::Execute(structured_from_driver(&err))
}
