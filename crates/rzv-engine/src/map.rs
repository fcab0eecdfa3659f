//! Stripe layout: how one logical I/O is split into parity and data columns.
//!
//! A [`RaidzMap`] is a list of rows; each row holds `parity + data` columns
//! and the first `parity` columns of every row are parity. Columns own their
//! bytes, so a map is self-contained and dropped as a unit.
//!
//! Two layouts are supported:
//!
//! - **Single row** ([`map_alloc`]): the payload is cut into `ashift`-sized
//!   sectors, spread over the data columns with the first `r` ("big") columns
//!   taking one extra sector. Narrow I/Os that do not fill a row only get
//!   the columns they occupy; the skip sectors that round the allocation up
//!   to a multiple of `parity + 1` are counted in [`RaidzMap::nskip`] but
//!   never become columns.
//! - **Expanded** ([`map_alloc_expanded`]): one sector per column per row,
//!   as written by a vdev that is being widened by one disk. The reflow offset
//!   only moves columns between the old and new device geometry; it never
//!   changes which bytes land in which column.

use rzv_error::{Result, RzvError};

/// Largest parity strength the engine supports (P, Q, R).
pub const MAX_PARITY: usize = 3;

/// Smallest supported sector shift.
pub const MIN_ASHIFT: u32 = 9;

/// Largest supported sector shift.
pub const MAX_ASHIFT: u32 = 16;

/// Role of a column within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Parity,
    Data,
}

/// One column of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidzCol {
    pub role: ColumnRole,
    /// Child device index this column would be written to.
    pub devidx: u64,
    /// Byte offset on that child device.
    pub offset: u64,
    data: Vec<u8>,
}

impl RaidzCol {
    fn new(role: ColumnRole, devidx: u64, offset: u64, size: usize) -> Self {
        Self {
            role,
            devidx,
            offset,
            data: vec![0; size],
        }
    }

    /// Column size in bytes. Zero for skip/phantom columns.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// One row of a stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidzRow {
    pub cols: Vec<RaidzCol>,
    pub first_data_col: usize,
}

impl RaidzRow {
    /// Number of data columns in this row (including empty ones).
    #[must_use]
    pub fn data_col_count(&self) -> usize {
        self.cols.len() - self.first_data_col
    }

    /// Data column `i` (logical index, parity excluded).
    #[must_use]
    pub fn data_col(&self, i: usize) -> &RaidzCol {
        &self.cols[self.first_data_col + i]
    }

    /// Parity column `i` (0 = P, 1 = Q, 2 = R).
    #[must_use]
    pub fn parity_col(&self, i: usize) -> &RaidzCol {
        &self.cols[i]
    }

    /// Split into `(parity, data)` column slices.
    pub fn split_mut(&mut self) -> (&mut [RaidzCol], &mut [RaidzCol]) {
        self.cols.split_at_mut(self.first_data_col)
    }
}

/// A fully laid-out stripe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidzMap {
    pub rows: Vec<RaidzRow>,
    parity: usize,
    /// Number of padding sectors needed to round the allocation up to a
    /// multiple of `parity + 1`.
    pub nskip: u64,
    /// First column that carries a skip sector.
    pub skipstart: u64,
}

impl RaidzMap {
    /// Parity strength (1..=3).
    #[must_use]
    pub fn parity(&self) -> usize {
        self.parity
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Expansion (reflow) parameters for [`map_alloc_expanded`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expansion {
    /// Byte offset up to which the reflow has already been synced.
    pub reflow_offset: u64,
}

/// Everything the allocator needs to lay out one I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapGeometry {
    /// Logical byte offset of the I/O on the parent vdev.
    pub offset: u64,
    /// Payload size in bytes.
    pub size: u64,
    /// log2 of the sector size.
    pub ashift: u32,
    /// Data columns (the vdev is `data_cols + parity` wide).
    pub data_cols: usize,
    pub parity: usize,
    pub expansion: Option<Expansion>,
}

impl MapGeometry {
    #[must_use]
    pub fn total_cols(&self) -> usize {
        self.data_cols + self.parity
    }

    /// Sector size in bytes.
    #[must_use]
    pub fn sector(&self) -> u64 {
        1_u64 << self.ashift
    }

    fn validate(&self) -> Result<()> {
        if !(1..=MAX_PARITY).contains(&self.parity) {
            return Err(RzvError::InvalidGeometry(format!(
                "parity {} outside 1..={MAX_PARITY}",
                self.parity
            )));
        }
        if self.data_cols == 0 {
            return Err(RzvError::InvalidGeometry("no data columns".into()));
        }
        if !(MIN_ASHIFT..=MAX_ASHIFT).contains(&self.ashift) {
            return Err(RzvError::InvalidGeometry(format!(
                "ashift {} outside {MIN_ASHIFT}..={MAX_ASHIFT}",
                self.ashift
            )));
        }
        if self.size < self.sector() {
            return Err(RzvError::InvalidGeometry(format!(
                "size {} smaller than one {}-byte sector",
                self.size,
                self.sector()
            )));
        }
        Ok(())
    }
}

fn roundup(x: u64, align: u64) -> u64 {
    x.div_ceil(align) * align
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| RzvError::InvalidGeometry(format!("{v} overflows usize")))
}

fn copy_payload(col: &mut RaidzCol, payload: &[u8], byte_off: usize) -> Result<()> {
    let size = col.size();
    let src = payload.get(byte_off..byte_off + size).ok_or_else(|| {
        RzvError::InvalidGeometry(format!(
            "payload of {} bytes too short for column at {byte_off}+{size}",
            payload.len()
        ))
    })?;
    col.data_mut().copy_from_slice(src);
    Ok(())
}

/// Lay out `payload` as a single-row stripe.
///
/// Only the first `(size >> ashift) << ashift` bytes of the payload are
/// placed; a trailing partial sector is not part of the stripe.
///
/// # Errors
///
/// `InvalidGeometry` if the geometry is out of range or `payload` is shorter
/// than `geometry.size`.
pub fn map_alloc(geometry: &MapGeometry, payload: &[u8]) -> Result<RaidzMap> {
    geometry.validate()?;
    if geometry.expansion.is_some() {
        return map_alloc_expanded(geometry, payload);
    }

    let ashift = geometry.ashift;
    let dcols = geometry.total_cols() as u64;
    let nparity = geometry.parity as u64;
    let ndata = dcols - nparity;

    let b = geometry.offset >> ashift;
    let s = geometry.size >> ashift;
    let f = b % dcols;
    let o = (b / dcols) << ashift;

    let q = s / ndata;
    let r = s - q * ndata;
    let bc = if r == 0 { 0 } else { r + nparity };
    let tot = s + nparity * (q + u64::from(r != 0));

    // Skip columns past `acols` carry no data and stay out of the row, so
    // the Q/R coefficients depend only on the populated columns.
    let acols = if q == 0 { bc } else { dcols };

    let mut cols = Vec::with_capacity(to_usize(acols)?);
    for c in 0..acols {
        let mut devidx = f + c;
        let mut coff = o;
        if devidx >= dcols {
            devidx -= dcols;
            coff += 1 << ashift;
        }
        let sectors = if c < bc {
            q + 1
        } else {
            q
        };
        let role = if c < nparity {
            ColumnRole::Parity
        } else {
            ColumnRole::Data
        };
        cols.push(RaidzCol::new(role, devidx, coff, to_usize(sectors << ashift)?));
    }

    let mut byte_off = 0;
    for col in cols.iter_mut().skip(geometry.parity) {
        copy_payload(col, payload, byte_off)?;
        byte_off += col.size();
    }

    // Single-parity stripes alternate P between the first two children on
    // every 1 MiB boundary so parity does not pile onto one disk.
    if geometry.parity == 1 && cols.len() > 1 && geometry.offset & (1 << 20) != 0 {
        let (devidx, offset) = (cols[0].devidx, cols[0].offset);
        cols[0].devidx = cols[1].devidx;
        cols[0].offset = cols[1].offset;
        cols[1].devidx = devidx;
        cols[1].offset = offset;
    }

    Ok(RaidzMap {
        rows: vec![RaidzRow {
            cols,
            first_data_col: geometry.parity,
        }],
        parity: geometry.parity,
        nskip: roundup(tot, nparity + 1) - tot,
        skipstart: bc,
    })
}

/// Lay out `payload` as a multi-row stripe on a vdev being expanded by one
/// child (`physical = logical + 1` columns).
///
/// Each column of each row holds exactly one sector. The last row may be
/// short; its missing data columns are kept as zero-length columns so parity
/// is still computed over the full logical width.
///
/// # Errors
///
/// `InvalidGeometry` if the geometry is out of range or `payload` is shorter
/// than `geometry.size`.
pub fn map_alloc_expanded(geometry: &MapGeometry, payload: &[u8]) -> Result<RaidzMap> {
    geometry.validate()?;
    let reflow_offset = geometry.expansion.map_or(u64::MAX, |e| e.reflow_offset);

    let ashift = geometry.ashift;
    let logical_cols = geometry.total_cols() as u64;
    let physical_cols = logical_cols + 1;
    let nparity = geometry.parity as u64;
    let ndata = logical_cols - nparity;

    let s = geometry.size >> ashift;
    let q = s / ndata;
    let r = s - q * ndata;
    let bc = if r == 0 { 0 } else { r + nparity };
    let tot = s + nparity * (q + u64::from(r != 0));

    let rows = tot.div_ceil(logical_cols);
    let cols = tot.min(logical_cols);
    let sector = to_usize(1 << ashift)?;

    let mut out = Vec::with_capacity(to_usize(rows)?);
    for row in 0..rows {
        // Starting parent sector of this row.
        let b = (geometry.offset >> ashift) + row * logical_cols;

        // Rows not yet copied by the reflow still live on the old, narrower
        // geometry.
        let row_phys_cols = if b + cols > reflow_offset >> ashift {
            physical_cols - 1
        } else {
            physical_cols
        };
        let mut child_id = b % row_phys_cols;
        let mut child_offset = (b / row_phys_cols) << ashift;

        let mut row_cols = Vec::with_capacity(to_usize(cols)?);
        for c in 0..cols {
            if child_id >= row_phys_cols {
                child_id -= row_phys_cols;
                child_offset += 1 << ashift;
            }
            let col = if c < nparity {
                RaidzCol::new(ColumnRole::Parity, child_id, child_offset, sector)
            } else if row == rows - 1 && bc != 0 && c >= bc {
                // Past the end of the block.
                RaidzCol::new(ColumnRole::Data, child_id, child_offset, 0)
            } else {
                let dc = c - nparity;
                let off = if c < bc || r == 0 {
                    dc * rows + row
                } else {
                    r * rows + (dc - r) * (rows - 1) + row
                };
                let mut col = RaidzCol::new(ColumnRole::Data, child_id, child_offset, sector);
                copy_payload(&mut col, payload, to_usize(off << ashift)?)?;
                col
            };
            row_cols.push(col);
            child_id += 1;
        }
        out.push(RaidzRow {
            cols: row_cols,
            first_data_col: geometry.parity,
        });
    }

    Ok(RaidzMap {
        rows: out,
        parity: geometry.parity,
        nskip: roundup(tot, nparity + 1) - tot,
        skipstart: bc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    fn geometry(size: u64, ashift: u32, data_cols: usize, parity: usize) -> MapGeometry {
        MapGeometry {
            offset: 0,
            size,
            ashift,
            data_cols,
            parity,
            expansion: None,
        }
    }

    /// Concatenating the data columns in row order reproduces the placed
    /// prefix of the payload.
    fn data_bytes(map: &RaidzMap) -> Vec<u8> {
        let mut out = Vec::new();
        for row in &map.rows {
            for i in 0..row.data_col_count() {
                out.extend_from_slice(row.data_col(i).data());
            }
        }
        out
    }

    #[test]
    fn full_stripe_splits_evenly() {
        let data = payload(8 * 4096);
        let map = map_alloc(&geometry(8 * 4096, 12, 8, 3), &data).expect("alloc");
        assert_eq!(map.row_count(), 1);
        let row = &map.rows[0];
        assert_eq!(row.cols.len(), 11);
        assert!(row.cols.iter().all(|c| c.size() == 4096));
        assert_eq!(map.skipstart, 0);
        assert_eq!(data_bytes(&map), data);
    }

    #[test]
    fn remainder_goes_to_big_columns() {
        // 21 sectors over 8 data columns: q=2, r=5.
        let data = payload(21 * 512);
        let map = map_alloc(&geometry(21 * 512, 9, 8, 2), &data).expect("alloc");
        let row = &map.rows[0];
        let sizes: Vec<usize> = row.cols.iter().map(RaidzCol::size).collect();
        assert_eq!(
            sizes,
            vec![1536, 1536, 1536, 1536, 1536, 1536, 1536, 1024, 1024, 1024]
        );
        assert_eq!(map.skipstart, 7);
        assert_eq!(data_bytes(&map), data);
    }

    #[test]
    fn narrow_io_only_lays_out_populated_columns() {
        // One sector, 8 data columns, parity 3: bc=4, nothing to skip.
        let data = payload(512);
        let map = map_alloc(&geometry(512, 9, 8, 3), &data).expect("alloc");
        let row = &map.rows[0];
        assert_eq!(row.cols.len(), 4);
        assert_eq!(row.data_col_count(), 1);
        assert_eq!(map.nskip, 0);

        // Two sectors, parity 1: bc=3 rounds up to 4, the skip sector is
        // counted but gets no column.
        let data = payload(1024);
        let map = map_alloc(&geometry(1024, 9, 8, 1), &data).expect("alloc");
        let sizes: Vec<usize> = map.rows[0].cols.iter().map(RaidzCol::size).collect();
        assert_eq!(sizes, vec![512, 512, 512]);
        assert_eq!(map.nskip, 1);
        assert_eq!(map.skipstart, 3);
    }

    #[test]
    fn narrow_io_data_width_does_not_depend_on_parity() {
        // 13 * 4096 bytes at 16K sectors over 8 data columns: three sectors,
        // which parity 1..=3 round up to different allocation widths.
        let data = payload(13 * 4096);
        let widths: Vec<usize> = (1..=MAX_PARITY)
            .map(|parity| {
                let map = map_alloc(&geometry(13 * 4096, 14, 8, parity), &data).expect("alloc");
                assert_eq!(map.rows[0].cols.len(), 3 + parity);
                map.rows[0].data_col_count()
            })
            .collect();
        assert_eq!(widths, vec![3, 3, 3]);
    }

    #[test]
    fn trailing_partial_sector_is_dropped() {
        // 13 * 4096 bytes at 16K sectors: three whole sectors.
        let data = payload(13 * 4096);
        let map = map_alloc(&geometry(13 * 4096, 14, 4, 1), &data).expect("alloc");
        let placed: usize = data_bytes(&map).len();
        assert_eq!(placed, 3 * 16384);
    }

    #[test]
    fn offset_rotates_devices_but_not_data() {
        let data = payload(16 * 512);
        let base = map_alloc(&geometry(16 * 512, 9, 4, 2), &data).expect("alloc");
        let mut shifted_geometry = geometry(16 * 512, 9, 4, 2);
        shifted_geometry.offset = 3 * 512;
        let shifted = map_alloc(&shifted_geometry, &data).expect("alloc");

        assert_eq!(data_bytes(&base), data_bytes(&shifted));
        assert_eq!(shifted.rows[0].cols[0].devidx, 3);
        assert_eq!(shifted.rows[0].cols[3].devidx, 0);
        assert_eq!(shifted.rows[0].cols[3].offset, 512);
    }

    #[test]
    fn single_parity_swaps_on_megabyte_boundary() {
        let data = payload(4 * 512);
        let mut g = geometry(4 * 512, 9, 4, 1);
        g.offset = 1 << 20;
        let map = map_alloc(&g, &data).expect("alloc");
        let cols = &map.rows[0].cols;
        let b = (1_u64 << 20) >> 9;
        assert_eq!(cols[0].devidx, (b + 1) % 5);
        assert_eq!(cols[1].devidx, b % 5);
    }

    #[test]
    fn undersized_payload_is_rejected() {
        let data = payload(256);
        let err = map_alloc(&geometry(256, 9, 4, 1), &data).unwrap_err();
        assert!(matches!(err, RzvError::InvalidGeometry(_)));

        let err = map_alloc(&geometry(4096, 9, 4, 4), &payload(4096)).unwrap_err();
        assert!(matches!(err, RzvError::InvalidGeometry(_)));

        let err = map_alloc(&geometry(4096, 9, 4, 1), &payload(1024)).unwrap_err();
        assert!(matches!(err, RzvError::InvalidGeometry(_)));
    }

    #[test]
    fn expanded_map_has_one_sector_per_column() {
        // 21 sectors, 8 data, parity 3: q=2, r=5, tot=21+9=30, rows=3.
        let data = payload(21 * 512);
        let mut g = geometry(21 * 512, 9, 8, 3);
        g.expansion = Some(Expansion { reflow_offset: 0 });
        let map = map_alloc(&g, &data).expect("alloc");
        assert_eq!(map.row_count(), 3);
        for row in &map.rows {
            assert_eq!(row.cols.len(), 11);
            assert!(row.cols[..3].iter().all(|c| c.size() == 512));
        }
        let last = &map.rows[2];
        let empty = last.cols.iter().filter(|c| c.size() == 0).count();
        assert_eq!(empty, 3);

        let mut placed = data_bytes(&map);
        placed.sort_unstable();
        let mut expected = data.clone();
        expected.sort_unstable();
        assert_eq!(placed, expected, "every sector placed exactly once");
    }

    #[test]
    fn expanded_column_order_is_row_major_within_column() {
        // 16 sectors over 4 data columns: 4 full rows, column dc holds
        // sectors dc*rows .. dc*rows+rows.
        let data = payload(16 * 512);
        let mut g = geometry(16 * 512, 9, 4, 1);
        g.expansion = Some(Expansion {
            reflow_offset: u64::MAX,
        });
        let map = map_alloc(&g, &data).expect("alloc");
        assert_eq!(map.row_count(), 4);
        for (row_idx, row) in map.rows.iter().enumerate() {
            for dc in 0..4 {
                let sector = dc * 4 + row_idx;
                assert_eq!(
                    row.data_col(dc).data(),
                    &data[sector * 512..(sector + 1) * 512]
                );
            }
        }
    }
}
