use std::fs;

use camino::Utf8Path;

use crate::error::MagvalError;
use crate::sphharm::CoefficientSet;

/// Contents of an `.shc` spherical-harmonic coefficient file: a list of
/// decimal-year epochs and one coefficient row per (degree, order) pair.
#[derive(Debug, Clone)]
pub struct ShcCoefficients {
    pub nmin: usize,
    pub nmax: usize,
    pub times: Vec<f64>,
    rows: Vec<ShcRow>,
}

#[derive(Debug, Clone)]
struct ShcRow {
    n: usize,
    m: i64,
    values: Vec<f64>,
}

impl ShcCoefficients {
    pub fn load(path: &Utf8Path) -> Result<Self, MagvalError> {
        let text = fs::read_to_string(path.as_std_path())
            .map_err(|err| MagvalError::ModelFile(format!("read {path}: {err}")))?;
        Self::parse(&text).map_err(|err| match err {
            MagvalError::ModelFile(message) => MagvalError::ModelFile(format!("{path}: {message}")),
            other => other,
        })
    }

    /// Parse the text format: `#` comment lines, a header line
    /// `nmin nmax ntimes spline_order nsteps`, the epoch row (decimal
    /// years) and one `n m value...` row per coefficient. Negative `m`
    /// denotes the sine (`h`) coefficient of order `|m|`.
    pub fn parse(text: &str) -> Result<Self, MagvalError> {
        let bad = |message: &str| MagvalError::ModelFile(message.to_string());
        let mut tokens = text
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .flat_map(|line| line.split_whitespace());

        let mut header = [0usize; 5];
        for slot in header.iter_mut() {
            *slot = tokens
                .next()
                .and_then(|token| token.parse().ok())
                .ok_or_else(|| bad("truncated header"))?;
        }
        let [nmin, nmax, ntimes, _spline_order, _nsteps] = header;
        if nmin > nmax || ntimes == 0 {
            return Err(bad("inconsistent header"));
        }

        let mut times = Vec::with_capacity(ntimes);
        for _ in 0..ntimes {
            times.push(
                tokens
                    .next()
                    .and_then(|token| token.parse().ok())
                    .ok_or_else(|| bad("truncated epoch row"))?,
            );
        }
        if times.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(bad("epochs are not strictly increasing"));
        }

        let mut rows = Vec::new();
        loop {
            let Some(first) = tokens.next() else { break };
            let n: usize = first.parse().map_err(|_| bad("invalid degree"))?;
            let m: i64 = tokens
                .next()
                .and_then(|token| token.parse().ok())
                .ok_or_else(|| bad("truncated coefficient row"))?;
            if n < nmin || n > nmax || m.unsigned_abs() as usize > n {
                return Err(bad("coefficient degree/order out of range"));
            }
            let mut values = Vec::with_capacity(ntimes);
            for _ in 0..ntimes {
                values.push(
                    tokens
                        .next()
                        .and_then(|token| token.parse().ok())
                        .ok_or_else(|| bad("truncated coefficient row"))?,
                );
            }
            rows.push(ShcRow { n, m, values });
        }
        if rows.is_empty() {
            return Err(bad("no coefficient rows"));
        }
        Ok(Self {
            nmin,
            nmax,
            times,
            rows,
        })
    }

    pub fn is_static(&self) -> bool {
        self.times.len() == 1
    }

    /// Gauss coefficients at the given decimal year, piecewise-linearly
    /// interpolated between epochs. Requests outside the covered span are
    /// an error; a single-epoch file is valid at any time.
    pub fn coefficients_at(&self, decimal_year: f64) -> Result<CoefficientSet, MagvalError> {
        let (lower, upper, weight) = if self.is_static() {
            (0, 0, 0.0)
        } else {
            let first = self.times[0];
            let last = self.times[self.times.len() - 1];
            if decimal_year < first || decimal_year > last {
                return Err(MagvalError::ModelFile(format!(
                    "time {decimal_year:.4} outside model validity {first:.4}/{last:.4}"
                )));
            }
            let upper = self
                .times
                .iter()
                .position(|&t| decimal_year <= t)
                .unwrap_or(self.times.len() - 1)
                .max(1);
            let lower = upper - 1;
            let span = self.times[upper] - self.times[lower];
            (lower, upper, (decimal_year - self.times[lower]) / span)
        };

        let mut coefficients = CoefficientSet::zeros(self.nmax);
        for row in &self.rows {
            let value = row.values[lower] + (row.values[upper] - row.values[lower]) * weight;
            let order = row.m.unsigned_abs() as usize;
            let (mut g, mut h) = coefficients.get(row.n, order);
            if row.m < 0 {
                h = value;
            } else {
                g = value;
            }
            coefficients.set(row.n, order, g, h);
        }
        Ok(coefficients)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const SAMPLE: &str = "\
# CHAOS-style core field subset
  1 2 3 2 1
  2019.0 2020.0 2021.0
  1  0  -29400.0 -29410.0 -29420.0
  1  1   -1450.0  -1452.0  -1454.0
  1 -1    4650.0   4652.0   4654.0
  2  0   -2500.0  -2502.0  -2504.0
";

    #[test]
    fn parse_and_interpolate() {
        let shc = ShcCoefficients::parse(SAMPLE).unwrap();
        assert_eq!(shc.nmax, 2);
        assert_eq!(shc.times, vec![2019.0, 2020.0, 2021.0]);

        let coefficients = shc.coefficients_at(2019.5).unwrap();
        assert_eq!(coefficients.get(1, 0).0, -29405.0);
        let (g11, h11) = coefficients.get(1, 1);
        assert_eq!(g11, -1451.0);
        assert_eq!(h11, 4651.0);
    }

    #[test]
    fn exact_epoch_values() {
        let shc = ShcCoefficients::parse(SAMPLE).unwrap();
        let coefficients = shc.coefficients_at(2021.0).unwrap();
        assert_eq!(coefficients.get(1, 0).0, -29420.0);
        assert_eq!(coefficients.get(2, 0).0, -2504.0);
    }

    #[test]
    fn time_outside_validity_is_an_error() {
        let shc = ShcCoefficients::parse(SAMPLE).unwrap();
        assert_matches!(
            shc.coefficients_at(2018.0),
            Err(MagvalError::ModelFile(_))
        );
        assert_matches!(
            shc.coefficients_at(2021.5),
            Err(MagvalError::ModelFile(_))
        );
    }

    #[test]
    fn static_single_epoch_file() {
        let sample = "\
# static field
20 21 1 2 0
2015.0
20 0 1.25
21 3 -0.5
";
        let shc = ShcCoefficients::parse(sample).unwrap();
        assert!(shc.is_static());
        let coefficients = shc.coefficients_at(1999.0).unwrap();
        assert_eq!(coefficients.get(20, 0).0, 1.25);
        assert_eq!(coefficients.get(21, 3).0, -0.5);
    }

    #[test]
    fn truncated_file_is_rejected() {
        assert_matches!(
            ShcCoefficients::parse("1 2 3 2 1\n2019.0 2020.0"),
            Err(MagvalError::ModelFile(_))
        );
        assert_matches!(
            ShcCoefficients::parse("# only comments\n"),
            Err(MagvalError::ModelFile(_))
        );
    }
}
