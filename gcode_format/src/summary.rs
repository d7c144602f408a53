//! Reads back G-code produced by [`crate::GcodeFile`] to report what it
//! contains. Only the subset of commands the writer emits is understood.

const LAYER_MARKER: &str = "; ---- layer at z=";

#[derive(Debug, Default)]
pub struct GcodeSummary {
    pub layers: Vec<LayerSummary>,
    pub tool_changes: usize,
    pub estimated_time: Option<String>,
}

#[derive(Debug, Default)]
pub struct LayerSummary {
    pub z: f32,
    /// If the extruder was zeroed before the first move of the layer.
    pub reset: bool,
    pub rapids: usize,
    /// E value after every printing move, in order.
    pub print_extrusion: Vec<f64>,
}

impl GcodeSummary {
    pub fn parse(text: &str) -> Self {
        let mut summary = GcodeSummary::default();

        for line in text.lines() {
            if let Some(z) = line.strip_prefix(LAYER_MARKER) {
                summary.layers.push(LayerSummary {
                    z: z.trim().parse().unwrap_or(f32::NAN),
                    ..Default::default()
                });
                continue;
            }

            if let Some(time) = line.strip_prefix("; estimated print time: ") {
                summary.estimated_time = Some(time.to_owned());
                continue;
            }

            let command = line.split(';').next().unwrap_or_default().trim();
            let mut words = command.split_whitespace();
            let Some(code) = words.next() else {
                continue;
            };

            if code.starts_with('T') {
                summary.tool_changes += 1;
                continue;
            }

            let Some(layer) = summary.layers.last_mut() else {
                continue;
            };

            match code {
                "G92" => layer.reset |= layer.rapids == 0 && layer.print_extrusion.is_empty(),
                "G0" => layer.rapids += 1,
                "G1" => {
                    let mut moves = false;
                    let mut extrusion = None;
                    for word in words {
                        let Some(axis) = word.chars().next() else {
                            continue;
                        };
                        match (axis, &word[axis.len_utf8()..]) {
                            ('X' | 'Y' | 'Z', _) => moves = true,
                            ('E', value) => extrusion = value.parse().ok(),
                            _ => {}
                        }
                    }

                    if let (true, Some(e)) = (moves, extrusion) {
                        layer.print_extrusion.push(e);
                    }
                }
                _ => {}
            }
        }

        summary
    }

    pub fn total_moves(&self) -> usize {
        (self.layers.iter())
            .map(|x| x.rapids + x.print_extrusion.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::GcodeSummary;

    #[test]
    fn parses_layers() {
        let text = "\
; generated by test
T0
; ---- layer at z=0.3
G92 E0 ; zero extruder
G1 E-1.00000 F1800.0 ; retract
G0 X1.000 Y1.000 Z0.300 F3600.0
G1 E0.00000 F1800.0 ; unretract
G1 X2.000 E0.05000
G1 Y2.000 E0.10000
; ---- layer at z=0.6
G0 X1.000
G92 E0 ; zero extruder
T1
; estimated print time: 1m 2s
";
        let summary = GcodeSummary::parse(text);
        assert_eq!(summary.layers.len(), 2);
        assert_eq!(summary.tool_changes, 2);
        assert_eq!(summary.estimated_time.as_deref(), Some("1m 2s"));

        let first = &summary.layers[0];
        assert!(first.reset);
        assert_eq!(first.rapids, 1);
        assert_eq!(first.print_extrusion, [0.05, 0.1]);

        assert!(!summary.layers[1].reset, "reset came after a move");
        assert_eq!(summary.total_moves(), 4);
    }

    #[test]
    fn odd_words_are_skipped() {
        let text = "\
; ---- layer at z=0.3
G1 ÅX1.000 E0.10000
G1 X2.000 Ébad E0.20000
G1 X3.000 E0.30000
";
        let summary = GcodeSummary::parse(text);
        assert_eq!(summary.layers[0].print_extrusion, [0.2, 0.3]);
    }
}
