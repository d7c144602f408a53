use std::{fs::File, io::Write, path::Path};

use anyhow::{Context, Result};
use common::toolpath::{LayerToolpath, Motion, Region};
use nalgebra::Vector2;
use svg::{
    node::element::{path::Data, Path as SvgPath, Rectangle},
    Document,
};

/// Top down drawing of one layer. Toolpaths are drawn in paint order, so
/// higher priority regions end up on top.
pub struct SvgPreview<'a> {
    layer: &'a LayerToolpath,
    platform: Vector2<f32>,
    line_width: f32,
}

impl<'a> SvgPreview<'a> {
    pub fn new(layer: &'a LayerToolpath, platform: Vector2<f32>, line_width: f32) -> Self {
        Self {
            layer,
            platform,
            line_width,
        }
    }

    pub fn document(&self) -> Document {
        let mut document = Document::new()
            .set("viewBox", (0.0, 0.0, self.platform.x, self.platform.y))
            .set("width", format!("{}mm", self.platform.x))
            .set("height", format!("{}mm", self.platform.y))
            .add(
                Rectangle::new()
                    .set("width", self.platform.x)
                    .set("height", self.platform.y)
                    .set("fill", "#1e1e1e"),
            );

        for toolpath in self.layer.paint_order() {
            let mut data = Data::new();
            let mut drawn = false;
            for element in toolpath.elements() {
                // SVG has y going down
                let point = element.target();
                let point = (point.x, self.platform.y - point.y);
                data = match element {
                    Motion::Rapid(_) => data.move_to(point),
                    Motion::Print(_) => {
                        drawn = true;
                        data.line_to(point)
                    }
                };
            }

            if !drawn {
                continue;
            }

            document = document.add(
                SvgPath::new()
                    .set("class", toolpath.region.name())
                    .set("fill", "none")
                    .set("stroke", region_color(toolpath.region))
                    .set("stroke-width", self.line_width)
                    .set("stroke-linejoin", "round")
                    .set("d", data),
            );
        }

        document
    }

    pub fn write<W: Write>(&self, out: W) -> Result<()> {
        svg::write(out, &self.document())?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Can't create preview `{}`", path.display()))?;
        self.write(file)
    }
}

fn region_color(region: Region) -> &'static str {
    match region {
        Region::Prime => "#b07cff",
        Region::Skirt => "#9e9e9e",
        Region::Support => "#ffb74d",
        Region::Shell => "#e57373",
        Region::Lid => "#64b5f6",
        Region::Infill => "#81c784",
    }
}
