//! Bit-exact pack/unpack for the types in [`super`].
//!
//! `unpack ∘ pack = id` over all valid structures; malformed buffers surface
//! as [`MuxError::Parse`] rather than panicking, since they can originate
//! from a remote peer.

use super::{
    Cell, Cursor, CursorKeyMode, CursorStyle, DirtyUpdate, MouseTracking, Row, CELL_SIZE,
    STATE_HEADER_SIZE,
};
use crate::error::MuxError;

pub fn pack_cells(cells: &[Cell]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(cells.len() * CELL_SIZE);
    for cell in cells {
        buf.extend_from_slice(&cell.codepoint.to_le_bytes());
        buf.extend_from_slice(&cell.fg);
        buf.extend_from_slice(&cell.bg);
        buf.push(cell.flag_byte());
        buf.push(cell.width);
        buf.extend_from_slice(&cell.hyperlink_id.to_le_bytes());
        buf.push(0); // reserved
        buf.push(0); // reserved
    }
    buf
}

pub fn unpack_cells(buffer: &[u8]) -> Result<Vec<Cell>, MuxError> {
    if buffer.len() % CELL_SIZE != 0 {
        return Err(MuxError::Parse(format!(
            "cell buffer length {} is not a multiple of {}",
            buffer.len(),
            CELL_SIZE
        )));
    }

    buffer
        .chunks_exact(CELL_SIZE)
        .map(|chunk| {
            let codepoint = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let fg = [chunk[4], chunk[5], chunk[6]];
            let bg = [chunk[7], chunk[8], chunk[9]];
            let (bold, italic, underline, strikethrough, inverse, blink, dim) =
                Cell::from_flag_byte(chunk[10]);
            let width = chunk[11];
            let hyperlink_id = u16::from_le_bytes([chunk[12], chunk[13]]);
            Ok(Cell {
                codepoint,
                fg,
                bg,
                bold,
                italic,
                underline,
                strikethrough,
                inverse,
                blink,
                dim,
                width,
                hyperlink_id,
            })
        })
        .collect()
}

/// `4 + cells.len * 16` bytes: a leading u32 length followed by packed cells.
pub fn pack_row(cells: &[Cell]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + cells.len() * CELL_SIZE);
    buf.extend_from_slice(&(cells.len() as u32).to_le_bytes());
    buf.extend_from_slice(&pack_cells(cells));
    buf
}

fn unpack_row_body(buffer: &[u8], cols: u16) -> Result<Row, MuxError> {
    let expected = cols as usize * CELL_SIZE;
    if buffer.len() != expected {
        return Err(MuxError::Parse(format!(
            "row body length {} does not match cols*{} = {}",
            buffer.len(),
            CELL_SIZE,
            expected
        )));
    }
    unpack_cells(buffer)
}

/// 28-byte header (see [`super::STATE_HEADER_SIZE`]) followed by
/// `rows * cols * 16` bytes of packed cell data.
pub fn pack_state(state: &super::TerminalState) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STATE_HEADER_SIZE + state.cells.len() * state.cols as usize * CELL_SIZE);
    buf.extend_from_slice(&(state.cols as u32).to_le_bytes());
    buf.extend_from_slice(&(state.rows as u32).to_le_bytes());
    buf.extend_from_slice(&(state.cursor.x as u32).to_le_bytes());
    buf.extend_from_slice(&(state.cursor.y as u32).to_le_bytes());
    buf.push(state.cursor.visible as u8);
    buf.push(state.cursor.style.to_byte());
    buf.push(state.modes.alternate_screen as u8);
    buf.push(state.modes.mouse_tracking.to_byte());
    buf.push(state.modes.cursor_key_mode.to_byte());
    buf.extend_from_slice(&[0u8; 7]); // reserved

    for row in &state.cells {
        buf.extend_from_slice(&pack_cells(row));
    }
    buf
}

pub fn unpack_state(buffer: &[u8]) -> Result<super::TerminalState, MuxError> {
    if buffer.len() < STATE_HEADER_SIZE {
        return Err(MuxError::Parse("state buffer shorter than header".into()));
    }
    let cols = u32::from_le_bytes(buffer[0..4].try_into().unwrap()) as u16;
    let rows = u32::from_le_bytes(buffer[4..8].try_into().unwrap()) as u16;
    let cursor_x = u32::from_le_bytes(buffer[8..12].try_into().unwrap()) as u16;
    let cursor_y = u32::from_le_bytes(buffer[12..16].try_into().unwrap()) as u16;
    let visible = buffer[16] != 0;
    let style = CursorStyle::from_byte(buffer[17]);
    let alternate_screen = buffer[18] != 0;
    let mouse_tracking = MouseTracking::from_byte(buffer[19]);
    let cursor_key_mode = CursorKeyMode::from_byte(buffer[20]);

    let body = &buffer[STATE_HEADER_SIZE..];
    let expected = rows as usize * cols as usize * CELL_SIZE;
    if body.len() != expected {
        return Err(MuxError::Parse(format!(
            "state body length {} does not match rows*cols*{} = {}",
            body.len(),
            CELL_SIZE,
            expected
        )));
    }

    let mut cells = Vec::with_capacity(rows as usize);
    for chunk in body.chunks_exact(cols as usize * CELL_SIZE) {
        cells.push(unpack_row_body(chunk, cols)?);
    }

    Ok(super::TerminalState {
        cols,
        rows,
        cells,
        cursor: Cursor {
            x: cursor_x,
            y: cursor_y,
            visible,
            style,
        },
        modes: super::Modes {
            alternate_screen,
            mouse_tracking,
            cursor_key_mode,
            in_band_resize: false,
            kitty_keyboard_flags: 0,
        },
    })
}

/// The three payloads that make up a `ptyUpdate` frame body, in wire order:
/// `(rowIndices, rowData, fullStateData)`. `rowData` has no per-row length
/// prefix — the reader reconstructs rows from `cols`.
pub struct PackedDirtyUpdate {
    pub row_indices: Vec<u8>,
    pub row_data: Vec<u8>,
    pub full_state_data: Vec<u8>,
}

pub fn pack_dirty_update(update: &DirtyUpdate) -> PackedDirtyUpdate {
    let mut row_indices = Vec::with_capacity(update.dirty_rows.len() * 2);
    let mut row_data = Vec::new();

    for (&index, row) in &update.dirty_rows {
        row_indices.extend_from_slice(&index.to_le_bytes());
        row_data.extend_from_slice(&pack_cells(row));
    }

    let full_state_data = match &update.full_state {
        Some(state) => pack_state(state),
        None => Vec::new(),
    };

    PackedDirtyUpdate {
        row_indices,
        row_data,
        full_state_data,
    }
}

/// Reconstructs the `(rowIndex, row)` pairs from a packed update's
/// `rowIndices`/`rowData` payloads, given the frame's `cols`.
pub fn unpack_dirty_rows(
    row_indices: &[u8],
    row_data: &[u8],
    cols: u16,
) -> Result<Vec<(u16, Row)>, MuxError> {
    if row_indices.len() % 2 != 0 {
        return Err(MuxError::Parse("rowIndices length must be even".into()));
    }
    let row_body_len = cols as usize * CELL_SIZE;
    let count = row_indices.len() / 2;
    if row_data.len() != count * row_body_len {
        return Err(MuxError::Parse(format!(
            "rowData length {} does not match {} rows of {} bytes",
            row_data.len(),
            count,
            row_body_len
        )));
    }

    let mut out = Vec::with_capacity(count);
    for (i, chunk) in row_indices.chunks_exact(2).enumerate() {
        let index = u16::from_le_bytes([chunk[0], chunk[1]]);
        let start = i * row_body_len;
        let row = unpack_row_body(&row_data[start..start + row_body_len], cols)?;
        out.push((index, row));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{Modes, ScrollState, TerminalState};
    use std::collections::BTreeMap;

    fn sample_cell(codepoint: char) -> Cell {
        Cell {
            codepoint: codepoint as u32,
            fg: [1, 2, 3],
            bg: [4, 5, 6],
            bold: true,
            italic: false,
            underline: true,
            strikethrough: false,
            inverse: false,
            blink: false,
            dim: true,
            width: 1,
            hyperlink_id: 7,
        }
    }

    #[test]
    fn pack_cells_round_trips() {
        let cells = vec![sample_cell('a'), sample_cell('€'), Cell::BLANK];
        let packed = pack_cells(&cells);
        assert_eq!(packed.len(), cells.len() * CELL_SIZE);
        assert_eq!(unpack_cells(&packed).unwrap(), cells);
    }

    #[test]
    fn unpack_cells_rejects_misaligned_buffer() {
        let err = unpack_cells(&[0u8; 17]).unwrap_err();
        assert!(matches!(err, MuxError::Parse(_)));
    }

    #[test]
    fn pack_row_prefixes_length() {
        let cells = vec![sample_cell('x'); 3];
        let packed = pack_row(&cells);
        let len = u32::from_le_bytes(packed[0..4].try_into().unwrap());
        assert_eq!(len, 3);
        assert_eq!(packed.len(), 4 + 3 * CELL_SIZE);
    }

    #[test]
    fn pack_state_round_trips() {
        let mut state = TerminalState::blank(4, 2);
        state.cells[0][0] = sample_cell('z');
        state.cursor.x = 2;
        state.cursor.y = 1;
        state.modes.alternate_screen = true;

        let packed = pack_state(&state);
        assert_eq!(packed.len(), STATE_HEADER_SIZE + 4 * 2 * CELL_SIZE);

        let unpacked = unpack_state(&packed).unwrap();
        assert_eq!(unpacked.cols, 4);
        assert_eq!(unpacked.rows, 2);
        assert_eq!(unpacked.cursor.x, 2);
        assert_eq!(unpacked.cursor.y, 1);
        assert!(unpacked.modes.alternate_screen);
        assert_eq!(unpacked.cells[0][0], sample_cell('z'));
    }

    #[test]
    fn dirty_update_pack_unpack_round_trips_rows() {
        let mut dirty_rows = BTreeMap::new();
        dirty_rows.insert(0u16, vec![sample_cell('a'); 3]);
        dirty_rows.insert(2u16, vec![sample_cell('b'); 3]);

        let update = DirtyUpdate {
            dirty_rows,
            cursor: Cursor::default(),
            scroll_state: ScrollState::new(0, 0, 10_000),
            cols: 3,
            rows: 5,
            is_full: false,
            full_state: None,
            modes: Modes::default(),
        };

        let packed = pack_dirty_update(&update);
        assert!(packed.full_state_data.is_empty());

        let restored = unpack_dirty_rows(&packed.row_indices, &packed.row_data, update.cols).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0], (0, vec![sample_cell('a'); 3]));
        assert_eq!(restored[1], (2, vec![sample_cell('b'); 3]));
    }
}
