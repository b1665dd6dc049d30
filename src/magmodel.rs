use ndarray::{Array1, Array2};

use crate::error::MagvalError;
use crate::shc::ShcCoefficients;
use crate::sphharm::{SourceDistribution, synthesize};
use crate::table::DataTable;
use crate::time_util::mjd2000_to_decimal_year;

/// Ratio between the F10.7 solar radio flux and the ionospheric current
/// strength modulation used by the MIO models.
pub const WOLF_RATIO: f64 = 0.014_85;

/// Auxiliary per-sample inputs. Required by the ionospheric models and
/// ignored by the others; passing unused fields never fails.
#[derive(Debug, Clone, Default)]
pub struct Auxiliary {
    pub f107: Option<Array1<f64>>,
    pub sun_declination: Option<Array1<f64>>,
    pub sun_longitude: Option<Array1<f64>>,
}

impl Auxiliary {
    pub fn none() -> Self {
        Self::default()
    }

    /// Pick the auxiliary columns out of a decoded table, tolerating their
    /// absence; models that need a missing one fail at evaluation time.
    pub fn from_table(table: &DataTable) -> Self {
        Self {
            f107: table.scalar("F107").ok().cloned(),
            sun_declination: table.scalar("SunDeclination").ok().cloned(),
            sun_longitude: table.scalar("SunLongitude").ok().cloned(),
        }
    }
}

/// One evaluable model component: field vectors (north, east, up) at each
/// (time, position) sample, in nT.
pub trait FieldModel: Send + Sync {
    fn name(&self) -> &str;

    fn eval(
        &self,
        times_mjd2000: &Array1<f64>,
        coords: &Array2<f64>,
        aux: &Auxiliary,
    ) -> Result<Array2<f64>, MagvalError>;
}

/// Sum the contributions of several model components and flip the radial
/// component into the NEC (north, east, center) convention.
pub fn eval_models(
    models: &[Box<dyn FieldModel>],
    times_mjd2000: &Array1<f64>,
    coords: &Array2<f64>,
    aux: &Auxiliary,
) -> Result<Array2<f64>, MagvalError> {
    let mut total = Array2::zeros((times_mjd2000.len(), 3));
    for model in models {
        total += &model.eval(times_mjd2000, coords, aux)?;
    }
    // scale (1, 1, -1): up -> center
    for mut row in total.rows_mut() {
        row[2] = -row[2];
    }
    Ok(total)
}

/// Internal field from an `.shc` coefficient file with decimal-year
/// epochs (core field; static field files carry a single epoch).
pub struct ShcModel {
    name: String,
    coefficients: ShcCoefficients,
}

impl ShcModel {
    pub fn new(name: &str, coefficients: ShcCoefficients) -> Self {
        Self {
            name: name.to_string(),
            coefficients,
        }
    }
}

impl FieldModel for ShcModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval(
        &self,
        times_mjd2000: &Array1<f64>,
        coords: &Array2<f64>,
        _aux: &Auxiliary,
    ) -> Result<Array2<f64>, MagvalError> {
        let mut field = Array2::zeros((times_mjd2000.len(), 3));
        for (i, &time) in times_mjd2000.iter().enumerate() {
            let coefficients = self
                .coefficients
                .coefficients_at(mjd2000_to_decimal_year(time))?;
            let sample = synthesize(
                &coefficients,
                SourceDistribution::Internal,
                coords[[i, 0]],
                coords[[i, 1]],
                coords[[i, 2]],
            );
            field[[i, 0]] = sample[0];
            field[[i, 1]] = sample[1];
            field[[i, 2]] = sample[2];
        }
        Ok(field)
    }
}

/// One part of a magnetospheric (MMA) model: a coefficient time series
/// with MJD2000 epochs, internal or external source distribution.
pub struct MmaModel {
    name: String,
    series: ShcCoefficients,
    distribution: SourceDistribution,
}

impl MmaModel {
    pub fn new(name: &str, series: ShcCoefficients, distribution: SourceDistribution) -> Self {
        Self {
            name: name.to_string(),
            series,
            distribution,
        }
    }
}

impl FieldModel for MmaModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval(
        &self,
        times_mjd2000: &Array1<f64>,
        coords: &Array2<f64>,
        _aux: &Auxiliary,
    ) -> Result<Array2<f64>, MagvalError> {
        let mut field = Array2::zeros((times_mjd2000.len(), 3));
        for (i, &time) in times_mjd2000.iter().enumerate() {
            let coefficients = self.series.coefficients_at(time)?;
            let sample = synthesize(
                &coefficients,
                self.distribution,
                coords[[i, 0]],
                coords[[i, 1]],
                coords[[i, 2]],
            );
            field[[i, 0]] = sample[0];
            field[[i, 1]] = sample[1];
            field[[i, 2]] = sample[2];
        }
        Ok(field)
    }
}

/// One part of an ionospheric (MIO) model: a static coefficient set in a
/// sun-fixed frame, modulated by the F10.7 index through the wolf ratio.
/// Requires the F10.7 and sub-solar longitude auxiliaries.
pub struct MioModel {
    name: String,
    coefficients: ShcCoefficients,
    distribution: SourceDistribution,
}

impl MioModel {
    pub fn new(name: &str, coefficients: ShcCoefficients, distribution: SourceDistribution) -> Self {
        Self {
            name: name.to_string(),
            coefficients,
            distribution,
        }
    }
}

impl FieldModel for MioModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn eval(
        &self,
        times_mjd2000: &Array1<f64>,
        coords: &Array2<f64>,
        aux: &Auxiliary,
    ) -> Result<Array2<f64>, MagvalError> {
        let f107 = aux
            .f107
            .as_ref()
            .ok_or(MagvalError::MissingAuxiliary("F107"))?;
        let sun_longitude = aux
            .sun_longitude
            .as_ref()
            .ok_or(MagvalError::MissingAuxiliary("SunLongitude"))?;

        let mut field = Array2::zeros((times_mjd2000.len(), 3));
        for (i, &time) in times_mjd2000.iter().enumerate() {
            let coefficients = self.coefficients.coefficients_at(time)?;
            let factor = 1.0 + WOLF_RATIO * f107[i];
            let sample = synthesize(
                &coefficients.scaled(factor),
                self.distribution,
                coords[[i, 0]],
                // sun-fixed frame: longitude relative to the sub-solar point
                coords[[i, 1]] - sun_longitude[i],
                coords[[i, 2]],
            );
            field[[i, 0]] = sample[0];
            field[[i, 1]] = sample[1];
            field[[i, 2]] = sample[2];
        }
        Ok(field)
    }
}
