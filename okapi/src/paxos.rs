//! The per-bin solver: builds the sparse incidence structure for one bin,
//! triangulates it by peeling, solves the residual dense core, and
//! back-substitutes to produce an output vector `P` with
//! `decode(h_i) = v_i` for every item in the bin.
//!
//! Values are width-generic: each item carries `width` blocks, laid out
//! row-major, and every operation below works on `width`-block rows.

use crate::{
    errors::Error,
    hashing::{PaxosHasher, BATCH_SIZE},
    params::{DenseField, PaxosParam},
};
use gimlet::{AesRng, Block, Gf128};

/// XOR `src` into `dst`, elementwise.
#[inline]
pub(crate) fn xor_row(dst: &mut [Block], src: &[Block]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= *s;
    }
}

/// Draw filler values: uniform from the bin's RNG, or zero in test mode.
#[inline]
fn fill_row(rng: &mut Option<AesRng>, dst: &mut [Block]) {
    if let Some(rng) = rng {
        rng.fill_blocks(dst);
    }
    // The output buffer is pre-zeroed, so zero fill is a no-op.
}

/// Reusable per-thread working memory; one instance serves every bin a
/// thread owns.
#[derive(Default)]
pub(crate) struct Scratch {
    rows: Vec<u32>,
    col_weight: Vec<u32>,
    col_offsets: Vec<u32>,
    col_cursor: Vec<u32>,
    col_backing: Vec<u32>,
    stack: Vec<u32>,
    log: Vec<(u32, u32)>,
    pivoted: Vec<bool>,
    pivot_col: Vec<bool>,
}

impl Scratch {
    pub fn new() -> Self {
        Scratch::default()
    }
}

/// Solver for a single bin, borrowing the shared sizing and hashing state.
pub(crate) struct Paxos<'a> {
    params: &'a PaxosParam,
    hasher: &'a PaxosHasher,
}

impl<'a> Paxos<'a> {
    pub fn new(params: &'a PaxosParam, hasher: &'a PaxosHasher) -> Self {
        Paxos { params, hasher }
    }

    /// Encode `values` under the item `hashes` into `output`
    /// (`params.size() * width` blocks). `fill` supplies the values of
    /// unconstrained columns.
    pub fn encode(
        &self,
        hashes: &[Block],
        values: &[Block],
        width: usize,
        output: &mut [Block],
        mut fill: Option<AesRng>,
        scratch: &mut Scratch,
    ) -> Result<(), Error> {
        let b = hashes.len();
        let w = self.params.weight;
        let ms = self.params.sparse_size;
        let d = self.params.dense_size;
        if values.len() != b * width || output.len() != self.params.size() * width {
            return Err(Error::MalformedInput(format!(
                "encode buffers do not match {} items of width {}",
                b, width
            )));
        }
        if b > u32::MAX as usize {
            return Err(Error::MalformedInput(format!("{} items per bin", b)));
        }
        output.fill(Block::ZERO);

        // Build the b x w row array, batched through AES.
        scratch.rows.clear();
        scratch.rows.resize(b * w, 0);
        for (i, chunk) in hashes.chunks(BATCH_SIZE).enumerate() {
            let rows = &mut scratch.rows[i * BATCH_SIZE * w..][..chunk.len() * w];
            self.hasher.build_row_batch(chunk, rows);
        }

        // Column weights and CSR incidence lists.
        scratch.col_weight.clear();
        scratch.col_weight.resize(ms, 0);
        for &c in scratch.rows.iter() {
            scratch.col_weight[c as usize] += 1;
        }
        scratch.col_offsets.clear();
        scratch.col_offsets.resize(ms + 1, 0);
        for c in 0..ms {
            scratch.col_offsets[c + 1] = scratch.col_offsets[c] + scratch.col_weight[c];
        }
        scratch.col_cursor.clear();
        scratch.col_cursor.extend_from_slice(&scratch.col_offsets[..ms]);
        scratch.col_backing.clear();
        scratch.col_backing.resize(b * w, 0);
        for r in 0..b {
            for &c in &scratch.rows[r * w..(r + 1) * w] {
                let cur = scratch.col_cursor[c as usize];
                scratch.col_backing[cur as usize] = r as u32;
                scratch.col_cursor[c as usize] = cur + 1;
            }
        }

        // Triangulate: repeatedly peel columns of weight one. The popped
        // column's single remaining row becomes a pivot.
        scratch.stack.clear();
        for c in 0..ms {
            if scratch.col_weight[c] == 1 {
                scratch.stack.push(c as u32);
            }
        }
        scratch.pivoted.clear();
        scratch.pivoted.resize(b, false);
        scratch.pivot_col.clear();
        scratch.pivot_col.resize(ms, false);
        scratch.log.clear();
        while let Some(c) = scratch.stack.pop() {
            let c = c as usize;
            if scratch.col_weight[c] != 1 {
                continue;
            }
            let lo = scratch.col_offsets[c] as usize;
            let hi = scratch.col_offsets[c + 1] as usize;
            let Some(&r) = scratch.col_backing[lo..hi]
                .iter()
                .find(|&&r| !scratch.pivoted[r as usize])
            else {
                continue;
            };
            scratch.pivoted[r as usize] = true;
            scratch.pivot_col[c] = true;
            scratch.log.push((r, c as u32));
            scratch.col_weight[c] = 0;
            for &c2 in &scratch.rows[r as usize * w..(r as usize + 1) * w] {
                let c2 = c2 as usize;
                if c2 == c {
                    continue;
                }
                scratch.col_weight[c2] -= 1;
                if scratch.col_weight[c2] == 1 {
                    scratch.stack.push(c2 as u32);
                }
            }
        }

        // Whatever survives peeling is the dense core.
        let core: Vec<u32> = (0..b as u32)
            .filter(|&r| !scratch.pivoted[r as usize])
            .collect();
        if core.len() > d {
            return Err(Error::EncodeRetry);
        }

        // Unconstrained sparse columns are free; give them filler so the
        // output is marginally uniform. Core rows touch only such columns,
        // so their residuals are fixed from here on.
        for c in 0..ms {
            if !scratch.pivot_col[c] {
                fill_row(&mut fill, &mut output[c * width..(c + 1) * width]);
            }
        }

        match self.params.dense_field {
            DenseField::Gf128 => {
                self.solve_dense_gf128(&core, hashes, values, width, output, &scratch.rows, &mut fill)?
            }
            DenseField::Binary => {
                self.solve_dense_binary(&core, hashes, values, width, output, &scratch.rows, &mut fill)?
            }
        }

        // Replay the peeling log backwards. By construction every other
        // column of a replayed row is already assigned.
        for &(r, c) in scratch.log.iter().rev() {
            let (r, c) = (r as usize, c as usize);
            let mut acc = vec![Block::ZERO; width];
            acc.copy_from_slice(&values[r * width..(r + 1) * width]);
            for &c2 in &scratch.rows[r * w..(r + 1) * w] {
                let c2 = c2 as usize;
                if c2 != c {
                    xor_row(&mut acc, &output[c2 * width..(c2 + 1) * width]);
                }
            }
            self.dense_contrib(hashes[r], &output[ms * width..], width, &mut acc);
            output[c * width..(c + 1) * width].copy_from_slice(&acc);
        }
        Ok(())
    }

    /// Residual right-hand side of a core row, once its sparse columns are
    /// assigned.
    fn core_rhs(
        &self,
        row: usize,
        values: &[Block],
        width: usize,
        output: &[Block],
        rows: &[u32],
    ) -> Vec<Block> {
        let w = self.params.weight;
        let mut rhs = values[row * width..(row + 1) * width].to_vec();
        for &c in &rows[row * w..(row + 1) * w] {
            let c = c as usize;
            xor_row(&mut rhs, &output[c * width..(c + 1) * width]);
        }
        rhs
    }

    /// Solve the dense core over GF(2^128). Row `i` has coefficients
    /// `[g_i^0, …, g_i^(d-1)]` for `g_i = dense(h_i)`, so the system is
    /// Vandermonde and invertible whenever the nodes are distinct.
    #[allow(clippy::too_many_arguments)]
    fn solve_dense_gf128(
        &self,
        core: &[u32],
        hashes: &[Block],
        values: &[Block],
        width: usize,
        output: &mut [Block],
        rows: &[u32],
        fill: &mut Option<AesRng>,
    ) -> Result<(), Error> {
        let d = self.params.dense_size;
        let ms = self.params.sparse_size;
        let r = core.len();
        let mut coeff = vec![Gf128::ZERO; r * d];
        let mut rhs = vec![Block::ZERO; r * width];
        for (i, &ri) in core.iter().enumerate() {
            let ri = ri as usize;
            let g = Gf128::from(self.hasher.dense_block(hashes[ri]));
            let mut p = Gf128::ONE;
            for j in 0..d {
                coeff[i * d + j] = p;
                p = p * g;
            }
            rhs[i * width..(i + 1) * width]
                .copy_from_slice(&self.core_rhs(ri, values, width, output, rows));
        }

        // Gauss-Jordan elimination with pivoting by column order.
        let mut pivots: Vec<(usize, usize)> = Vec::with_capacity(r);
        let mut used_row = vec![false; r];
        for j in 0..d {
            let Some(i) = (0..r).find(|&i| !used_row[i] && !coeff[i * d + j].is_zero()) else {
                continue;
            };
            used_row[i] = true;
            let inv = coeff[i * d + j].inverse();
            for jj in 0..d {
                coeff[i * d + jj] = coeff[i * d + jj] * inv;
            }
            for t in 0..width {
                rhs[i * width + t] = inv.mul_block(rhs[i * width + t]);
            }
            for i2 in 0..r {
                if i2 == i {
                    continue;
                }
                let f = coeff[i2 * d + j];
                if f.is_zero() {
                    continue;
                }
                for jj in 0..d {
                    let v = coeff[i * d + jj];
                    coeff[i2 * d + jj] = coeff[i2 * d + jj] + f * v;
                }
                for t in 0..width {
                    let v = rhs[i * width + t];
                    rhs[i2 * width + t] ^= f.mul_block(v);
                }
            }
            pivots.push((i, j));
            if pivots.len() == r {
                break;
            }
        }
        if pivots.len() < r {
            return Err(Error::EncodeRetry);
        }

        let mut pivot_dense = vec![false; d];
        for &(_, j) in &pivots {
            pivot_dense[j] = true;
        }
        for (j, &is_pivot) in pivot_dense.iter().enumerate() {
            if !is_pivot {
                fill_row(fill, &mut output[(ms + j) * width..(ms + j + 1) * width]);
            }
        }
        // After full elimination each pivot row references only its own
        // pivot column and free columns.
        for &(i, j) in &pivots {
            let mut acc = rhs[i * width..(i + 1) * width].to_vec();
            for (jj, &is_pivot) in pivot_dense.iter().enumerate() {
                if is_pivot {
                    continue;
                }
                let f = coeff[i * d + jj];
                if f.is_zero() {
                    continue;
                }
                for t in 0..width {
                    acc[t] ^= f.mul_block(output[(ms + jj) * width + t]);
                }
            }
            output[(ms + j) * width..(ms + j + 1) * width].copy_from_slice(&acc);
        }
        Ok(())
    }

    /// Solve the dense core over GF(2): row `i`'s coefficients are the low
    /// `d` bits of `dense(h_i)`.
    #[allow(clippy::too_many_arguments)]
    fn solve_dense_binary(
        &self,
        core: &[u32],
        hashes: &[Block],
        values: &[Block],
        width: usize,
        output: &mut [Block],
        rows: &[u32],
        fill: &mut Option<AesRng>,
    ) -> Result<(), Error> {
        let d = self.params.dense_size;
        let ms = self.params.sparse_size;
        let r = core.len();
        let dmask = if d == 128 { u128::MAX } else { (1u128 << d) - 1 };
        let mut masks = vec![0u128; r];
        let mut rhs = vec![Block::ZERO; r * width];
        for (i, &ri) in core.iter().enumerate() {
            let ri = ri as usize;
            masks[i] = u128::from(self.hasher.dense_block(hashes[ri])) & dmask;
            rhs[i * width..(i + 1) * width]
                .copy_from_slice(&self.core_rhs(ri, values, width, output, rows));
        }

        let mut pivots: Vec<(usize, usize)> = Vec::with_capacity(r);
        let mut used_row = vec![false; r];
        for j in 0..d {
            let bit = 1u128 << j;
            let Some(i) = (0..r).find(|&i| !used_row[i] && masks[i] & bit != 0) else {
                continue;
            };
            used_row[i] = true;
            let pivot_mask = masks[i];
            let pivot_rhs = rhs[i * width..(i + 1) * width].to_vec();
            for i2 in 0..r {
                if i2 != i && masks[i2] & bit != 0 {
                    masks[i2] ^= pivot_mask;
                    xor_row(&mut rhs[i2 * width..(i2 + 1) * width], &pivot_rhs);
                }
            }
            pivots.push((i, j));
            if pivots.len() == r {
                break;
            }
        }
        if pivots.len() < r {
            return Err(Error::EncodeRetry);
        }

        let mut pivot_dense = vec![false; d];
        for &(_, j) in &pivots {
            pivot_dense[j] = true;
        }
        for (j, &is_pivot) in pivot_dense.iter().enumerate() {
            if !is_pivot {
                fill_row(fill, &mut output[(ms + j) * width..(ms + j + 1) * width]);
            }
        }
        for &(i, j) in &pivots {
            let mut acc = rhs[i * width..(i + 1) * width].to_vec();
            for (jj, &is_pivot) in pivot_dense.iter().enumerate() {
                if !is_pivot && masks[i] & (1u128 << jj) != 0 {
                    for t in 0..width {
                        acc[t] ^= output[(ms + jj) * width + t];
                    }
                }
            }
            output[(ms + j) * width..(ms + j + 1) * width].copy_from_slice(&acc);
        }
        Ok(())
    }

    /// XOR the dense-tail contribution of an item into `acc`.
    pub fn dense_contrib(&self, h: Block, dense_p: &[Block], width: usize, acc: &mut [Block]) {
        let d = self.params.dense_size;
        match self.params.dense_field {
            DenseField::Binary => {
                let bits = u128::from(self.hasher.dense_block(h));
                for j in 0..d {
                    if (bits >> j) & 1 == 1 {
                        xor_row(acc, &dense_p[j * width..(j + 1) * width]);
                    }
                }
            }
            DenseField::Gf128 => {
                let g = Gf128::from(self.hasher.dense_block(h));
                let mut p = Gf128::ONE;
                for j in 0..d {
                    for t in 0..width {
                        acc[t] ^= p.mul_block(dense_p[j * width + t]);
                    }
                    p = p * g;
                }
            }
        }
    }

    /// Decode one item: XOR of `P` over the row's sparse columns plus the
    /// dense contribution. `add` selects accumulate over assign.
    pub fn decode_one(
        &self,
        h: Block,
        row: &[u32],
        p: &[Block],
        width: usize,
        out: &mut [Block],
        add: bool,
    ) {
        let ms = self.params.sparse_size;
        if !add {
            out.fill(Block::ZERO);
        }
        for &c in row {
            let c = c as usize;
            xor_row(out, &p[c * width..(c + 1) * width]);
        }
        self.dense_contrib(h, &p[ms * width..], width, out);
    }
}
