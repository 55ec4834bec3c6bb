use crate::config::ConfigError;
use ndarray::{Array2, ArrayView2, s};
use std::collections::HashMap;

/// Native definition of a named source grid: full shape plus geographic
/// extent [lat_min, lat_max, lon_min, lon_max] used to synthesize the
/// coordinate vectors.
#[derive(Debug, Clone, Copy)]
struct NativeGrid {
    shape: (usize, usize),
    extent: [f64; 4],
    default_proj: &'static str,
}

fn native_grid(name: &str) -> Option<NativeGrid> {
    match name {
        // AROME France sub-grid used by the regional forecast datasets
        "franmgsp" => Some(NativeGrid {
            shape: (768, 1024),
            extent: [37.5, 55.4, -12.0, 16.0],
            default_proj: "PlateCarree",
        }),
        // WW3 wave model grid over Brittany
        "bretagne0002" => Some(NativeGrid {
            shape: (691, 941),
            extent: [47.0, 49.5, -6.2, -0.8],
            default_proj: "PlateCarree",
        }),
        _ => None,
    }
}

/// Rectangular crop window in source-grid index space, half-open on the
/// max side: rows `row_min..row_max`, cols `col_min..col_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub row_min: usize,
    pub row_max: usize,
    pub col_min: usize,
    pub col_max: usize,
}

impl CropWindow {
    pub fn shape(&self) -> (usize, usize) {
        (self.row_max - self.row_min, self.col_max - self.col_min)
    }
}

/// Resolved grid description. Immutable after construction; the crop
/// window is computed once here and reused for every field crop.
#[derive(Debug, Clone)]
pub struct GridSpec {
    pub name: String,
    pub native_shape: (usize, usize),
    pub border_size: usize,
    pub subdomain: [usize; 4],
    pub window: CropWindow,
    pub proj_name: String,
    pub projection_kwargs: HashMap<String, String>,
    /// Latitude of each row of the crop window (degrees north).
    pub latitudes: Vec<f64>,
    /// Longitude of each column of the crop window (degrees east).
    pub longitudes: Vec<f64>,
}

impl GridSpec {
    /// Resolve a named grid into a `GridSpec`. The crop window is the
    /// subdomain expanded outward by `border_size` on all four sides and
    /// clipped to the native grid extent.
    pub fn resolve(
        name: &str,
        border_size: usize,
        subdomain: [i64; 4],
        proj_name: Option<&str>,
        projection_kwargs: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let native = native_grid(name)
            .ok_or_else(|| ConfigError::UnknownGrid(name.to_string()))?;
        Self::resolve_custom(
            name,
            native.shape,
            native.extent,
            border_size,
            subdomain,
            Some(proj_name.unwrap_or(native.default_proj)),
            projection_kwargs,
        )
    }

    /// Resolve against an explicitly supplied native definition instead
    /// of the named-grid table.
    pub fn resolve_custom(
        name: &str,
        native_shape: (usize, usize),
        extent: [f64; 4],
        border_size: usize,
        subdomain: [i64; 4],
        proj_name: Option<&str>,
        projection_kwargs: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let (nrows, ncols) = native_shape;

        let [row_min, row_max, col_min, col_max] = subdomain;
        if subdomain.iter().any(|&v| v < 0) {
            return Err(ConfigError::Invalid(format!(
                "subdomain {subdomain:?} has negative bounds"
            )));
        }
        if row_min >= row_max || col_min >= col_max {
            return Err(ConfigError::Invalid(format!(
                "subdomain {subdomain:?} has inverted bounds"
            )));
        }
        if row_max as usize > nrows || col_max as usize > ncols {
            return Err(ConfigError::Invalid(format!(
                "subdomain {subdomain:?} exceeds native extent {nrows}x{ncols} of grid '{name}'"
            )));
        }
        let subdomain = [
            row_min as usize,
            row_max as usize,
            col_min as usize,
            col_max as usize,
        ];

        let window = CropWindow {
            row_min: subdomain[0].saturating_sub(border_size),
            row_max: (subdomain[1] + border_size).min(nrows),
            col_min: subdomain[2].saturating_sub(border_size),
            col_max: (subdomain[3] + border_size).min(ncols),
        };

        let lat_of = |row: usize| -> f64 {
            let [lat_min, lat_max, _, _] = extent;
            lat_min + (lat_max - lat_min) * row as f64 / (nrows - 1).max(1) as f64
        };
        let lon_of = |col: usize| -> f64 {
            let [_, _, lon_min, lon_max] = extent;
            lon_min + (lon_max - lon_min) * col as f64 / (ncols - 1).max(1) as f64
        };
        let latitudes = (window.row_min..window.row_max).map(lat_of).collect();
        let longitudes = (window.col_min..window.col_max).map(lon_of).collect();

        Ok(Self {
            name: name.to_string(),
            native_shape,
            border_size,
            subdomain,
            window,
            proj_name: proj_name.unwrap_or("PlateCarree").to_string(),
            projection_kwargs,
            latitudes,
            longitudes,
        })
    }

    /// Shape of every cropped field emitted from this grid.
    pub fn cropped_shape(&self) -> (usize, usize) {
        self.window.shape()
    }

    /// Crop a native-shape field to the resolved window. The caller must
    /// have validated the field shape against `native_shape`.
    pub fn crop(&self, field: ArrayView2<f32>) -> Array2<f32> {
        let w = self.window;
        field
            .slice(s![w.row_min..w.row_max, w.col_min..w.col_max])
            .to_owned()
    }
}
