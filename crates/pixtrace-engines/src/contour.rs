//! Primary engine: incremental border-following tracer.
//!
//! [`ContourConverter::init`] runs Suzuki-Abe border following
//! (`imageproc::contours::find_contours`) once over the black pixels and
//! groups every outer border with the holes directly inside it. Each
//! [`tick`](ContourConverter::tick) then turns one of those regions into
//! a [`Shape`], so a large image is converted over many scheduling turns.
//!
//! Geometry per [`CurveFitting`] mode:
//!
//! - `Pixel`: border pixel centers, straight edges, nothing removed.
//! - `Polygon`: Ramer-Douglas-Peucker simplified polygon.
//! - `Spline`: simplified polygon with short edges merged. Vertices
//!   turning at least the corner threshold stay sharp; those and the
//!   splice points stay put while the rest are relaxed for up to
//!   `max_iterations` passes, then a Catmull-Rom spline is fitted.

use image::GrayImage;
use imageproc::contours::{BorderType, Contour, find_contours};
use pixtrace_core::engine::{
    EngineError, IncrementalTracer, PrimaryEngine, PrimaryOptions, RenderOptions,
};
use pixtrace_core::preprocess::is_black;
use pixtrace_core::{CurveFitting, PixelBuffer};
use pixtrace_export::{PathPoint, RenderStyle, Shape, to_svg};

use crate::geometry;

/// Simplification tolerance of polygon and spline modes, in pixels.
pub const POLYGON_TOLERANCE: f64 = 1.0;

/// The bundled primary engine.
#[derive(Debug, Default)]
pub struct ContourEngine {
    loaded: bool,
}

impl ContourEngine {
    /// An engine that loads on first use.
    #[must_use]
    pub const fn new() -> Self {
        Self { loaded: false }
    }
}

impl PrimaryEngine for ContourEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        if !self.loaded {
            log::debug!("contour engine loaded");
            self.loaded = true;
        }
        Ok(())
    }

    fn converter(
        &mut self,
        image: PixelBuffer,
        options: &PrimaryOptions,
        render: &RenderOptions,
    ) -> Result<Box<dyn IncrementalTracer>, EngineError> {
        if !self.loaded {
            return Err(EngineError::Unavailable(String::from(
                "contour engine used before load",
            )));
        }
        Ok(Box::new(ContourConverter::new(image, *options, render.clone())))
    }
}

/// One outer border and the holes directly inside it, in pixel-center
/// coordinates.
struct Region {
    outer: Vec<PathPoint>,
    holes: Vec<Vec<PathPoint>>,
}

/// An in-progress conversion of one binary image.
pub struct ContourConverter {
    image: PixelBuffer,
    options: PrimaryOptions,
    render: RenderOptions,
    regions: Option<Vec<Region>>,
    next: usize,
    shapes: Vec<Shape>,
}

impl std::fmt::Debug for ContourConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContourConverter")
            .field("dimensions", &self.image.dimensions())
            .field("options", &self.options)
            .field("next", &self.next)
            .finish_non_exhaustive()
    }
}

impl ContourConverter {
    /// Prepare a conversion; nothing runs until [`init`](IncrementalTracer::init).
    #[must_use]
    pub const fn new(image: PixelBuffer, options: PrimaryOptions, render: RenderOptions) -> Self {
        Self {
            image,
            options,
            render,
            regions: None,
            next: 0,
            shapes: Vec::new(),
        }
    }

    fn is_done(&self) -> bool {
        self.regions
            .as_ref()
            .is_some_and(|regions| self.next >= regions.len())
    }

    fn shape(&self, region: &Region) -> Shape {
        let subpaths = std::iter::once(&region.outer)
            .chain(&region.holes)
            .filter_map(|outline| self.outline(outline))
            .collect();
        Shape { subpaths }
    }

    fn outline(&self, points: &[PathPoint]) -> Option<pixtrace_export::Subpath> {
        match self.options.mode {
            CurveFitting::Pixel => geometry::polygon(&geometry::drop_collinear(points)),
            CurveFitting::Polygon => {
                geometry::polygon(&geometry::simplify_closed(points, POLYGON_TOLERANCE))
            }
            CurveFitting::Spline => {
                let simplified = geometry::simplify_closed(points, POLYGON_TOLERANCE);
                let merged = geometry::merge_short_edges(&simplified, self.options.length_threshold);
                let corners =
                    geometry::sharp_vertices(&merged, f64::from(self.options.corner_threshold));
                let splices =
                    geometry::sharp_vertices(&merged, f64::from(self.options.splice_threshold));
                let pinned: Vec<bool> = corners.iter().zip(&splices).map(|(c, s)| *c || *s).collect();
                let relaxed = geometry::relax(&merged, &pinned, self.options.max_iterations);
                geometry::catmull_rom(&relaxed, &corners)
            }
        }
    }
}

impl IncrementalTracer for ContourConverter {
    fn init(&mut self) -> Result<(), EngineError> {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return Err(EngineError::Failed(format!(
                "cannot trace an empty {width}x{height} image"
            )));
        }
        let mask = GrayImage::from_fn(width, height, |x, y| {
            image::Luma([if is_black(&self.image, x, y) { 255 } else { 0 }])
        });
        let regions = group_regions(&find_contours::<u32>(&mask), self.options.filter_speckle);
        log::debug!(
            "contour engine: {} region(s) in {width}x{height}",
            regions.len()
        );
        self.regions = Some(regions);
        Ok(())
    }

    fn tick(&mut self) -> Result<bool, EngineError> {
        let Some(regions) = &self.regions else {
            return Err(EngineError::Failed(String::from(
                "contour converter ticked before init",
            )));
        };
        if let Some(region) = regions.get(self.next) {
            let shape = self.shape(region);
            if !shape.subpaths.is_empty() {
                self.shapes.push(shape);
            }
            self.next += 1;
        }
        Ok(self.is_done())
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress(&self) -> f64 {
        match &self.regions {
            None => 0.0,
            Some(regions) if regions.is_empty() => 1.0,
            Some(regions) => self.next as f64 / regions.len() as f64,
        }
    }

    fn take_markup(&mut self) -> Result<String, EngineError> {
        if !self.is_done() {
            return Err(EngineError::Failed(String::from(
                "contour conversion is not complete",
            )));
        }
        let (width, height) = self.image.dimensions();
        let style = RenderStyle {
            fill: self.render.fill.clone(),
            background: self.render.background.clone(),
            scale: self.render.scale,
            precision: self.options.path_precision,
        };
        Ok(to_svg(&std::mem::take(&mut self.shapes), width, height, &style))
    }
}

/// Pair each outer border with its direct holes and drop regions (and
/// holes) enclosing fewer than `filter_speckle²` pixels.
fn group_regions(contours: &[Contour<u32>], filter_speckle: u32) -> Vec<Region> {
    let min_area = f64::from(filter_speckle) * f64::from(filter_speckle);
    let outlines: Vec<Vec<PathPoint>> = contours
        .iter()
        .map(|c| {
            c.points
                .iter()
                .map(|p| PathPoint::new(f64::from(p.x) + 0.5, f64::from(p.y) + 0.5))
                .collect()
        })
        .collect();
    let large_enough = |points: &[PathPoint]| {
        points.len() >= 3 && geometry::signed_area(points).abs() >= min_area
    };

    let mut regions: Vec<(usize, Region)> = contours
        .iter()
        .enumerate()
        .filter(|(i, c)| c.border_type == BorderType::Outer && large_enough(&outlines[*i]))
        .map(|(i, _)| {
            (
                i,
                Region {
                    outer: outlines[i].clone(),
                    holes: Vec::new(),
                },
            )
        })
        .collect();

    for (i, contour) in contours.iter().enumerate() {
        if contour.border_type != BorderType::Hole || !large_enough(&outlines[i]) {
            continue;
        }
        if let Some((_, region)) = regions
            .iter_mut()
            .find(|(outer, _)| Some(*outer) == contour.parent)
        {
            region.holes.push(outlines[i].clone());
        }
    }
    regions.into_iter().map(|(_, region)| region).collect()
}
