use accurate::sum::Klein;
use accurate::traits::*;

use crate::{SfxError, SfxResult};

/// A helper method to get histogram edges from evenly-spaced `bins` over a given `range`
/// # See Also
/// [`Histogram`]
/// [`get_bin_index`]
pub fn get_bin_edges(bins: usize, range: (f64, f64)) -> Vec<f64> {
    let bin_width = (range.1 - range.0) / (bins as f64);
    (0..=bins)
        .map(|i| range.0 + (i as f64 * bin_width))
        .collect()
}

/// A helper method to obtain the index of a bin where a value should go in a histogram with
/// evenly spaced `bins` over a given `range`
///
/// # See Also
/// [`Histogram`]
/// [`get_bin_edges`]
pub fn get_bin_index(value: f64, bins: usize, limits: (f64, f64)) -> Option<usize> {
    if value >= limits.0 && value < limits.1 {
        let bin_width = (limits.1 - limits.0) / bins as f64;
        let bin_index = ((value - limits.0) / bin_width).floor() as usize;
        Some(bin_index.min(bins - 1))
    } else {
        None
    }
}

/// A simple struct which represents a histogram
pub struct Histogram {
    /// The number of counts in each bin
    pub counts: Vec<usize>,
    /// The edges of each bin (length is one greater than `counts`)
    pub bin_edges: Vec<f64>,
}

/// A method which creates a histogram from some data by binning it with evenly spaced
/// `bins` within the given `range`
pub fn histogram<T: AsRef<[f64]>>(values: T, bins: usize, range: (f64, f64)) -> Histogram {
    let mut counts = vec![0; bins];
    for &value in values.as_ref() {
        if let Some(bin_index) = get_bin_index(value, bins, range) {
            counts[bin_index] += 1;
        }
    }
    Histogram {
        counts,
        bin_edges: get_bin_edges(bins, range),
    }
}

/// Compensated sum of a slice.
pub fn sum(values: &[f64]) -> f64 {
    values.iter().copied().sum_with_accumulator::<Klein<_>>()
}

/// Mean and unweighted sample standard deviation (the `n - 1` convention used by the
/// indexing summaries).
pub fn mean_and_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let mean = sum(values) / values.len() as f64;
    if values.len() == 1 {
        return Some((mean, 0.0));
    }
    let squared: Vec<f64> = values.iter().map(|v| (v - mean) * (v - mean)).collect();
    let variance = sum(&squared) / (values.len() - 1) as f64;
    Some((mean, variance.sqrt()))
}

/// Median of a slice (mean of the middle pair for even lengths).
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    })
}

/// Convert a string of integer ranges (e.g. `"1:4,6"`) into a list (`[1, 2, 3, 6]`)
///
/// Each comma-separated piece is either a single integer, a half-open `start:stop` range,
/// or a `start:stop:step` range with Python `range` semantics (negative steps count down).
/// Refinement-step selections use `-1` for the conventional-merge baseline, so values may
/// be negative.
pub fn expand_integer_ranges(ranges_str: &str) -> SfxResult<Vec<i64>> {
    let mut indices = Vec::new();
    if ranges_str.trim().is_empty() {
        return Ok(indices);
    }
    for range_str in ranges_str.split(',') {
        let parse_error = || SfxError::ParseError {
            name: range_str.to_string(),
            object: "integer range".to_string(),
        };
        let descriptors = range_str
            .split(':')
            .map(|v| v.trim().parse::<i64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| parse_error())?;
        match descriptors[..] {
            [single] => indices.push(single),
            [start, stop] => indices.extend(start..stop),
            [start, stop, step] if step != 0 => {
                let mut value = start;
                while (step > 0 && value < stop) || (step < 0 && value > stop) {
                    indices.push(value);
                    value += step;
                }
            }
            _ => return Err(parse_error()),
        }
    }
    Ok(indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_counts_and_edges() {
        let hist = histogram([0.5, 1.5, 1.6, 2.5, 9.0], 3, (0.0, 3.0));
        assert_eq!(hist.counts, vec![1, 2, 1]);
        assert_eq!(hist.bin_edges.len(), 4);
        assert_relative_eq!(hist.bin_edges[1], 1.0);
    }

    #[test]
    fn test_mean_std_median() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let (mean, std) = mean_and_std(&values).unwrap();
        assert_relative_eq!(mean, 5.0);
        assert_relative_eq!(std, (32.0f64 / 7.0).sqrt());
        assert_relative_eq!(median(&values).unwrap(), 4.5);
        assert!(mean_and_std(&[]).is_none());
    }

    #[test]
    fn test_expand_integer_ranges() {
        assert_eq!(
            expand_integer_ranges("0:8:2,10").unwrap(),
            vec![0, 2, 4, 6, 10]
        );
        assert_eq!(expand_integer_ranges("1:4,6").unwrap(), vec![1, 2, 3, 6]);
        assert_eq!(expand_integer_ranges("-1,2").unwrap(), vec![-1, 2]);
        assert_eq!(expand_integer_ranges("5:2:-1").unwrap(), vec![5, 4, 3]);
        assert_eq!(expand_integer_ranges("").unwrap(), Vec::<i64>::new());
        assert!(expand_integer_ranges("1:2:3:4").is_err());
        assert!(expand_integer_ranges("a:b").is_err());
        assert!(expand_integer_ranges("1:5:0").is_err());
    }
}
