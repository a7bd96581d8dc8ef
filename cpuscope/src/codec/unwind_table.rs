//! Unwind table wire format
//!
//! ```text
//! u64 row_count
//! row_count × { u64 location, u64 cfa_register, i64 cfa_offset, i64 rbp_offset }
//! ```
//!
//! Only x86_64 is supported, where the return address position is fixed by
//! the ABI, so rows carry no return address rule.

use cpuscope_common::{
    CFA_EXPRESSION_OFFSET, CFA_EXPRESSION_REGISTER, MAX_UNWIND_TABLE_SIZE, UNWIND_HEADER_SIZE,
    UNWIND_ROW_SIZE,
};

use super::ByteOrder;
use crate::domain::CodecError;
use crate::unwind::{CfaRule, Row, UnwindTable};

/// Encode `table` into the layout the sampler reads
///
/// # Errors
/// - [`CodecError::TableTooLarge`] if the table has `MAX_UNWIND_TABLE_SIZE` rows or more
/// - [`CodecError::InvalidRule`] if a rule cannot be told apart from the expression sentinel
pub fn encode_unwind_table(table: &UnwindTable, order: ByteOrder) -> Result<Vec<u8>, CodecError> {
    if table.len() >= MAX_UNWIND_TABLE_SIZE {
        return Err(CodecError::TableTooLarge { rows: table.len(), max: MAX_UNWIND_TABLE_SIZE });
    }

    let mut buf = Vec::with_capacity(UNWIND_HEADER_SIZE + table.len() * UNWIND_ROW_SIZE);
    order.put_u64(&mut buf, table.len() as u64);

    for (idx, row) in table.iter().enumerate() {
        let (register, offset) = cfa_slots(row.cfa).ok_or(CodecError::InvalidRule { row: idx })?;

        order.put_u64(&mut buf, row.location);
        order.put_u64(&mut buf, register);
        order.put_i64(&mut buf, offset);
        order.put_i64(&mut buf, row.frame_pointer_offset);
    }

    Ok(buf)
}

/// Decode an unwind table, e.g. one read back from the map
///
/// Bytes past the last row are ignored: map values are padded to the full
/// table capacity. The expression sentinel decodes to [`CfaRule::ByExpression`].
///
/// # Errors
/// - [`CodecError::Truncated`] if there are fewer bytes than the row count needs
/// - [`CodecError::TableTooLarge`] if the row count is out of range
pub fn decode_unwind_table(bytes: &[u8], order: ByteOrder) -> Result<UnwindTable, CodecError> {
    if bytes.len() < UNWIND_HEADER_SIZE {
        return Err(CodecError::Truncated {
            what: "unwind table header",
            expected: UNWIND_HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let rows = usize::try_from(order.read_u64(bytes)).unwrap_or(usize::MAX);
    if rows >= MAX_UNWIND_TABLE_SIZE {
        return Err(CodecError::TableTooLarge { rows, max: MAX_UNWIND_TABLE_SIZE });
    }

    let end = UNWIND_HEADER_SIZE + rows * UNWIND_ROW_SIZE;
    if bytes.len() < end {
        return Err(CodecError::Truncated {
            what: "unwind table",
            expected: end,
            actual: bytes.len(),
        });
    }

    let rows = bytes[UNWIND_HEADER_SIZE..end]
        .chunks_exact(UNWIND_ROW_SIZE)
        .map(|chunk| decode_row(chunk, order))
        .collect();

    Ok(UnwindTable::new(rows))
}

/// Register and offset slots for a CFA rule
///
/// `None` for a register rule that collides with the expression sentinel,
/// since it would be read back as an expression.
fn cfa_slots(rule: CfaRule) -> Option<(u64, i64)> {
    match rule {
        CfaRule::ByRegisterOffset { register, offset } => {
            if register == CFA_EXPRESSION_REGISTER && offset == CFA_EXPRESSION_OFFSET {
                None
            } else {
                Some((register, offset))
            }
        }
        CfaRule::ByExpression => Some((CFA_EXPRESSION_REGISTER, CFA_EXPRESSION_OFFSET)),
    }
}

fn decode_row(chunk: &[u8], order: ByteOrder) -> Row {
    let location = order.read_u64(&chunk[0..8]);
    let register = order.read_u64(&chunk[8..16]);
    let offset = order.read_i64(&chunk[16..24]);
    let frame_pointer_offset = order.read_i64(&chunk[24..32]);

    let cfa = if register == CFA_EXPRESSION_REGISTER && offset == CFA_EXPRESSION_OFFSET {
        CfaRule::ByExpression
    } else {
        CfaRule::ByRegisterOffset { register, offset }
    };

    Row { location, cfa, frame_pointer_offset }
}
