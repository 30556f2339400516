use crate::models::quote::RawRow;

/// True if any record carries a split or a cash dividend, which means the
/// provider's adjusted history before that record has changed.
pub fn has_corporate_action(rows: &[RawRow]) -> bool {
    rows.iter()
        .any(|r| r.split_factor != 1.0 || r.div_cash != 0.0)
}
