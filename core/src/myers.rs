//! Myers O(ND) shortest-edit-script diff (spec §4.4 "slice diffing" step 1:
//! "run Myers over the untrimmed middle"). No direct corpus grounding — the
//! algorithm is textbook (Myers 1986) — but the shape (edit script as
//! `Keep`/`Delete`/`Insert` over index pairs, backtracked from a saved
//! frontier history) follows how diff-shaped code in the pack structures a
//! trace-and-backtrack implementation.

/// One step of a shortest edit script between `a` (old) and `b` (new),
/// carrying the index into each side it refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edit {
    Keep(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Computes a shortest edit script turning `a` into `b`, using `eq` as the
/// element equality predicate (callers may plug in a keyed comparator for
/// §4.4's "keyed-slice" alignment instead of structural equality).
pub fn diff<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> Vec<Edit> {
    let n = a.len();
    let m = b.len();
    if n == 0 && m == 0 {
        return Vec::new();
    }
    let max = n + m;
    let offset = max as isize;
    let size = 2 * max + 1;
    let mut trace: Vec<Vec<isize>> = Vec::new();
    let mut v = vec![0isize; size];

    'outer: for d in 0..=max as isize {
        trace.push(v.clone());
        for k in (-d..=d).step_by(2) {
            let idx = (k + offset) as usize;
            let mut x = if k == -d || (k != d && v[idx_prev(idx)] < v[idx_next(idx)]) {
                v[idx_next(idx)]
            } else {
                v[idx_prev(idx)] + 1
            };
            let mut y = x - k;
            while (x as usize) < n && (y as usize) < m && eq(&a[x as usize], &b[y as usize]) {
                x += 1;
                y += 1;
            }
            v[idx] = x;
            if x as usize >= n && y as usize >= m {
                break 'outer;
            }
        }
    }

    backtrack(&trace, n, m, offset)
}

fn idx_prev(idx: usize) -> usize {
    idx - 1
}

fn idx_next(idx: usize) -> usize {
    idx + 1
}

fn backtrack(trace: &[Vec<isize>], n: usize, m: usize, offset: isize) -> Vec<Edit> {
    let mut x = n as isize;
    let mut y = m as isize;
    let mut ops = Vec::new();

    for d in (0..trace.len()).rev() {
        let v = &trace[d];
        let k = x - y;
        let idx = (k + offset) as usize;
        let prev_k = if k == -(d as isize) || (k != d as isize && v[idx_prev(idx)] < v[idx_next(idx)]) {
            k + 1
        } else {
            k - 1
        };
        let prev_idx = (prev_k + offset) as usize;
        let prev_x = v[prev_idx];
        let prev_y = prev_x - prev_k;

        while x > prev_x && y > prev_y {
            ops.push(Edit::Keep((x - 1) as usize, (y - 1) as usize));
            x -= 1;
            y -= 1;
        }
        if d > 0 {
            if x == prev_x {
                ops.push(Edit::Insert((y - 1) as usize));
            } else {
                ops.push(Edit::Delete((x - 1) as usize));
            }
            x = prev_x;
            y = prev_y;
        }
    }
    ops.reverse();
    ops
}
