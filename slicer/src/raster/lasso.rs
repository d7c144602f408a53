use common::toolpath::{Region, Toolpath};
use imageproc::{
    contours::find_contours,
    morphology::{grayscale_dilate, grayscale_erode, Mask as Kernel},
};
use nalgebra::Vector2;

use super::Mask;

/// Largest radius the structuring element supports. Bigger offsets are split
/// into multiple passes.
const MAX_KERNEL_RADIUS: u32 = u8::MAX as u32;
/// Tolerance in pixels used when simplifying traced outlines.
const SIMPLIFY_EPSILON: f32 = 0.5;

impl Mask {
    /// Erodes the mask by `distance` millimeters.
    pub fn contract(&mut self, distance: f32) {
        let radius = self.kernel_radius(distance);
        self.morph(radius, grayscale_erode);
    }

    /// Dilates the mask by `distance` millimeters.
    pub fn expand(&mut self, distance: f32) {
        let radius = self.kernel_radius(distance);
        self.morph(radius, grayscale_dilate);
    }

    fn kernel_radius(&self, distance: f32) -> u32 {
        self.grid.mm_to_px(distance).round().max(0.0) as u32
    }

    fn morph(&mut self, mut radius: u32, op: fn(&image::GrayImage, &Kernel) -> image::GrayImage) {
        while radius > 0 {
            let step = radius.min(MAX_KERNEL_RADIUS);
            self.image = op(&self.image, &Kernel::disk(step as u8));
            radius -= step;
        }
    }

    /// Outlines of every solid region, in plate coordinates. Outer boundaries
    /// and hole boundaries are both returned.
    pub fn trace(&self) -> Vec<Vec<Vector2<f32>>> {
        let epsilon = SIMPLIFY_EPSILON / self.grid.pixels_per_mm;

        find_contours::<i32>(&self.image)
            .into_iter()
            .map(|contour| {
                let points = (contour.points.iter())
                    .map(|p| self.grid.pixel_center(p.x as f32, p.y as f32))
                    .collect::<Vec<_>>();
                simplify_loop(&points, epsilon)
            })
            .filter(|x| !x.is_empty())
            .collect()
    }

    /// Turns the outline of the mask into closed printing loops. Returns
    /// `None` when there is nothing to trace.
    pub fn toolpath_from_lasso(&self, z: f32, region: Region, extruder: u32) -> Option<Toolpath> {
        let mut toolpath = Toolpath::new(region, extruder, z);

        for outline in self.trace() {
            if outline.len() < 2 {
                continue;
            }

            toolpath.start_path(outline[0]);
            for point in &outline[1..] {
                toolpath.continue_path(*point);
            }
            toolpath.close_path();
        }

        (!toolpath.is_empty()).then_some(toolpath)
    }

    /// Contracts the mask in place, then traces what is left.
    pub fn toolpath_from_lasso_and_contract(
        &mut self,
        z: f32,
        distance: f32,
        region: Region,
        extruder: u32,
    ) -> Option<Toolpath> {
        self.contract(distance);
        self.toolpath_from_lasso(z, region, extruder)
    }

    /// Expands the mask in place, then traces it.
    pub fn toolpath_from_lasso_and_expand(
        &mut self,
        z: f32,
        distance: f32,
        region: Region,
        extruder: u32,
    ) -> Option<Toolpath> {
        self.expand(distance);
        self.toolpath_from_lasso(z, region, extruder)
    }
}

/// Ramer-Douglas-Peucker on a closed loop. The first point is kept as the
/// anchor and the loop is split at the point furthest from it.
fn simplify_loop(points: &[Vector2<f32>], epsilon: f32) -> Vec<Vector2<f32>> {
    if points.len() < 4 {
        return points.to_vec();
    }

    let anchor = points[0];
    let (far, _) = (points.iter().enumerate())
        .map(|(i, p)| (i, (p - anchor).magnitude_squared()))
        .fold((0, 0.0), |acc, x| if x.1 > acc.1 { x } else { acc });
    if far == 0 {
        return vec![anchor];
    }

    let mut out = Vec::new();
    simplify_open(&points[..=far], epsilon, &mut out);
    out.pop();

    let mut back = points[far..].to_vec();
    back.push(anchor);
    simplify_open(&back, epsilon, &mut out);
    out.pop();

    out
}

/// Pushes the simplified polyline, including both endpoints, onto `out`.
fn simplify_open(points: &[Vector2<f32>], epsilon: f32, out: &mut Vec<Vector2<f32>>) {
    let (first, last) = (points[0], points[points.len() - 1]);
    let mut split = None;
    let mut max = epsilon;

    for (i, point) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let distance = segment_distance(*point, first, last);
        if distance > max {
            (split, max) = (Some(i), distance);
        }
    }

    match split {
        Some(i) => {
            simplify_open(&points[..=i], epsilon, out);
            out.pop();
            simplify_open(&points[i..], epsilon, out);
        }
        None => {
            out.push(first);
            if points.len() > 1 {
                out.push(last);
            }
        }
    }
}

fn segment_distance(point: Vector2<f32>, a: Vector2<f32>, b: Vector2<f32>) -> f32 {
    let ab = b - a;
    let length = ab.magnitude_squared();
    if length == 0.0 {
        return (point - a).magnitude();
    }

    let t = ((point - a).dot(&ab) / length).clamp(0.0, 1.0);
    (point - (a + ab * t)).magnitude()
}
