use crate::models::{INJURY_COLUMNS, InjuryRecord};
use crate::snapshot::Table;

#[derive(Debug, Clone, PartialEq)]
pub struct InjuryProjection {
    pub records: Vec<InjuryRecord>,
    /// Projected columns found in the source, in fact-table order.
    pub present_columns: Vec<String>,
    /// Projected columns the source lacked.
    pub dropped_columns: Vec<String>,
}

impl InjuryProjection {
    /// The projected rows restricted to the columns the source actually had.
    pub fn to_table(&self) -> Table {
        InjuryRecord::to_table(&self.records, &self.present_columns)
    }
}

/// Projects an injury snapshot onto the injury fact shape. Missing columns are
/// reported rather than failing the projection.
pub fn project_injuries(table: &Table) -> InjuryProjection {
    let (present, dropped): (Vec<&str>, Vec<&str>) =
        INJURY_COLUMNS.iter().partition(|c| table.has_column(c));
    if !dropped.is_empty() {
        log::warn!("injury snapshot missing column(s): {}", dropped.join(", "));
    }

    let records = table
        .rows()
        .map(|row| InjuryRecord {
            player_id: row.text("player_id"),
            season: row.get("season").as_i64(),
            week: row.get("week").as_i64(),
            injury_type: row.text("injury_type"),
            status: row.text("status"),
        })
        .collect();

    InjuryProjection {
        records,
        present_columns: present.into_iter().map(str::to_string).collect(),
        dropped_columns: dropped.into_iter().map(str::to_string).collect(),
    }
}
