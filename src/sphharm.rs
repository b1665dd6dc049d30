//! Schmidt semi-normalized spherical-harmonic synthesis of geomagnetic
//! field vectors from Gauss coefficient sets.

/// Mean geomagnetic reference radius in km.
pub const REFERENCE_RADIUS_KM: f64 = 6371.2;

/// Whether the coefficient set describes sources below (internal) or above
/// (external) the evaluation shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDistribution {
    Internal,
    External,
}

/// One set of Gauss coefficients up to degree `nmax`, in Schmidt
/// semi-normalized convention. `g` holds the cosine terms, `h` the sine
/// terms, both flattened over (n, m) with `h[n][0]` unused.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientSet {
    nmax: usize,
    g: Vec<f64>,
    h: Vec<f64>,
}

impl CoefficientSet {
    pub fn zeros(nmax: usize) -> Self {
        let terms = flat_size(nmax);
        Self {
            nmax,
            g: vec![0.0; terms],
            h: vec![0.0; terms],
        }
    }

    pub fn nmax(&self) -> usize {
        self.nmax
    }

    pub fn set(&mut self, n: usize, m: usize, g: f64, h: f64) {
        let index = flat_index(n, m);
        self.g[index] = g;
        self.h[index] = h;
    }

    pub fn get(&self, n: usize, m: usize) -> (f64, f64) {
        let index = flat_index(n, m);
        (self.g[index], self.h[index])
    }

    pub fn scaled(&self, factor: f64) -> CoefficientSet {
        let mut out = self.clone();
        for i in 0..out.g.len() {
            out.g[i] *= factor;
            out.h[i] *= factor;
        }
        out
    }
}

fn flat_size(nmax: usize) -> usize {
    (nmax + 1) * (nmax + 2) / 2
}

fn flat_index(n: usize, m: usize) -> usize {
    n * (n + 1) / 2 + m
}

/// Evaluate the field of one coefficient set at a single point, returning
/// (north, east, up) components in the coefficient units.
pub fn synthesize(
    coefficients: &CoefficientSet,
    distribution: SourceDistribution,
    lat_deg: f64,
    lon_deg: f64,
    radius_km: f64,
) -> [f64; 3] {
    let nmax = coefficients.nmax;
    let colat = (90.0 - lat_deg).to_radians();
    let lon = lon_deg.to_radians();
    let cos_colat = colat.cos();
    let sin_colat = colat.sin();
    // east component carries a 1/sin(colat) factor; clamp near the poles
    let sin_safe = if sin_colat.abs() < 1e-10 {
        1e-10_f64.copysign(if sin_colat == 0.0 { 1.0 } else { sin_colat })
    } else {
        sin_colat
    };

    let (p, dp) = legendre_schmidt(nmax, cos_colat, sin_colat);

    let ratio = REFERENCE_RADIUS_KM / radius_km;
    let mut north = 0.0;
    let mut east = 0.0;
    let mut up = 0.0;

    for n in 1..=nmax {
        // radial dependency and its B_r multiplier per source distribution
        let (radial, radial_up) = match distribution {
            SourceDistribution::Internal => {
                let f = ratio.powi(n as i32 + 2);
                (f, f * (n as f64 + 1.0))
            }
            SourceDistribution::External => {
                let f = (1.0 / ratio).powi(n as i32 - 1);
                (f, -f * n as f64)
            }
        };
        for m in 0..=n {
            let (g, h) = coefficients.get(n, m);
            if g == 0.0 && h == 0.0 {
                continue;
            }
            let (sin_m, cos_m) = (m as f64 * lon).sin_cos();
            let harmonic = g * cos_m + h * sin_m;
            let index = flat_index(n, m);
            north += radial * harmonic * dp[index];
            east += radial * (m as f64 / sin_safe) * (g * sin_m - h * cos_m) * p[index];
            up += radial_up * harmonic * p[index];
        }
    }
    [north, east, up]
}

/// Schmidt semi-normalized associated Legendre functions and their
/// derivatives with respect to colatitude, flattened over (n, m).
fn legendre_schmidt(nmax: usize, cos_colat: f64, sin_colat: f64) -> (Vec<f64>, Vec<f64>) {
    let size = flat_size(nmax);
    let mut p = vec![0.0; size];
    let mut dp = vec![0.0; size];
    p[0] = 1.0;

    for n in 1..=nmax {
        // sectoral term (n == m)
        let diag = flat_index(n, n);
        let prev_diag = flat_index(n - 1, n - 1);
        let factor = if n == 1 {
            1.0
        } else {
            ((2 * n - 1) as f64 / (2 * n) as f64).sqrt()
        };
        p[diag] = factor * sin_colat * p[prev_diag];
        dp[diag] = factor * (sin_colat * dp[prev_diag] + cos_colat * p[prev_diag]);

        for m in 0..n {
            let index = flat_index(n, m);
            let prev = flat_index(n - 1, m);
            let norm = (((n * n - m * m) as f64).sqrt()).recip();
            let c1 = (2 * n - 1) as f64 * norm;
            if n >= 2 && m <= n - 2 {
                let prev2 = flat_index(n - 2, m);
                let c2 = (((n - 1) * (n - 1) - m * m) as f64).sqrt() * norm;
                p[index] = c1 * cos_colat * p[prev] - c2 * p[prev2];
                dp[index] = c1 * (cos_colat * dp[prev] - sin_colat * p[prev]) - c2 * dp[prev2];
            } else {
                p[index] = c1 * cos_colat * p[prev];
                dp[index] = c1 * (cos_colat * dp[prev] - sin_colat * p[prev]);
            }
        }
    }
    (p, dp)
}
