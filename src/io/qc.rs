/// Quality-control output: whitespace-separated ASCII tables and the gnuplot
/// scripts which display them

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use itertools::Itertools;
use ndhistogram::{axis::Uniform, ndhistogram, Histogram};

/// Write `rows` one per line, preceded by `header` as a `#` comment
pub fn write_table<R, I>(path: &Path, header: &str, rows: I) -> std::io::Result<()>
where
    R: AsRef<[f32]>,
    I: IntoIterator<Item = R>,
{
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "# {header}")?;
    for row in rows {
        writeln!(out, "{}", row.as_ref().iter().join(" "))?;
    }
    out.flush()
}

pub fn write_script(path: &Path, script: &str) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(script.as_bytes())?;
    out.flush()
}

/// Counts of `values` in `bins` uniform bins over `[low, high)`; values
/// outside the range are not counted.
pub fn histogram(values: &[f32], bins: usize, low: f32, high: f32) -> Vec<usize> {
    let mut h = ndhistogram!(Uniform::new(bins, low, high); usize);
    for v in values { h.fill(v) }
    // Index 0 is the underflow bin
    (1..=bins).map(|i| h.value_at_index(i).copied().unwrap_or(0)).collect()
}

/// Side-by-side histograms of two sets of values over a common range, one
/// line per bin: `centre count_a count_b`
pub fn write_histograms(path: &Path, header: &str, a: &[f32], b: &[f32], bins: usize) -> std::io::Result<()> {
    let (low, high) = a.iter().chain(b).fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let (low, high) = if low < high { (low, high) } else { (0.0, 1.0) };
    // Widen the top edge so the maximum lands in the last bin
    let high = high + (high - low) * 1e-4;
    let width = (high - low) / bins as f32;
    let (ha, hb) = (histogram(a, bins, low, high), histogram(b, bins, low, high));
    let rows = (0..bins).map(|i| [low + (i as f32 + 0.5) * width, ha[i] as f32, hb[i] as f32]);
    write_table(path, header, rows)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;
    #[allow(unused)] use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn histogram_ignores_out_of_range() {
        let h = histogram(&[0.1, 0.2, 0.6, 1.5, -1.0], 2, 0.0, 1.0);
        assert_eq!(h, vec![2, 1]);
    }

    #[test]
    fn tables_are_plain_text() -> std::io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("t.dat");
        write_table(&path, "x y", vec![[1.0, 2.5], [3.0, 0.25]])?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(text, "# x y\n1 2.5\n3 0.25\n");
        Ok(())
    }

    #[test]
    fn histograms_count_every_value() -> std::io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("h.dat");
        let a = [0.0, 0.05, 0.1, 0.1];
        let b = [0.096, 0.096, 0.0];
        write_histograms(&path, "mu before after", &a, &b, 5)?;
        let text = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = text.lines().skip(1).collect();
        assert_eq!(lines.len(), 5);
        let totals = lines.iter().fold((0.0, 0.0), |(x, y), line| {
            let f: Vec<f32> = line.split(' ').map(|s| s.parse().unwrap()).collect();
            (x + f[1], y + f[2])
        });
        assert_eq!(totals, (4.0, 3.0));
        Ok(())
    }
}
