use std::io::{self, Write};

use common::config::SliceConfig;
use nalgebra::Vector3;

use crate::TONES;

/// Stateful G-code emitter. Keeps track of the head position, feedrate,
/// extrusion and tool so that only values that changed are sent.
pub struct GcodeWriter<W: Write> {
    out: W,
    settings: WriterSettings,

    position: Vector3<f64>,
    /// Filament fed since the last extruder reset. Never decreases between
    /// resets, retraction is tracked separately.
    extruded: f64,
    retracted: f64,
    feedrate: f64,
    tool: u32,

    print_feedrate: f64,
    layer_time: f64,
    total_time: f64,
}

#[derive(Debug, Clone)]
pub struct WriterSettings {
    pub extrusion_factor: f64,
    pub print_feedrate: f64,
    pub rapid_feedrate: f64,
    pub retract_feedrate: f64,
    pub retract_distance: f64,

    pub extruder_temperature: u32,
    pub bed_temperature: u32,
    pub fans: u32,
}

impl<W: Write> GcodeWriter<W> {
    pub fn new(out: W, settings: WriterSettings) -> Self {
        Self {
            out,
            print_feedrate: settings.print_feedrate,
            settings,

            position: Vector3::zeros(),
            extruded: 0.0,
            retracted: 0.0,
            feedrate: 0.0,
            tool: 0,

            layer_time: 0.0,
            total_time: 0.0,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    /// Filament fed since the last [`GcodeWriter::reset_extruder`].
    pub fn extrusion(&self) -> f64 {
        self.extruded
    }

    pub fn feedrate(&self) -> f64 {
        self.feedrate
    }

    pub fn tool(&self) -> u32 {
        self.tool
    }

    pub fn settings(&self) -> &WriterSettings {
        &self.settings
    }

    /// Estimated seconds spent since the last [`GcodeWriter::begin_layer`].
    pub fn layer_time(&self) -> f64 {
        self.layer_time
    }

    pub fn total_time(&self) -> f64 {
        self.total_time
    }

    /// Overrides the feedrate of printing moves, used to slow down small
    /// layers.
    pub fn set_print_feedrate(&mut self, feedrate: f64) {
        self.print_feedrate = feedrate;
    }

    pub fn send_init_sequence(&mut self, generator: &str) -> io::Result<()> {
        let (ext, bed) = (
            self.settings.extruder_temperature,
            self.settings.bed_temperature,
        );

        self.comment(&format!("generated by {generator}"))?;
        self.line("G21", Some("set units to millimeters"))?;
        self.line("G90", Some("use absolute coordinates"))?;
        self.line("G28", Some("home all axes"))?;
        self.position = Vector3::zeros();
        self.line("G1 Z5 F5000", Some("lift nozzle"))?;
        (self.position.z, self.feedrate) = (5.0, 5000.0);
        self.line(&format!("M140 S{bed}"), Some("set bed temperature"))?;
        self.line("T0", None)?;
        self.tool = 0;
        self.line("M82", Some("use absolute distances for extrusion"))?;
        self.line(&format!("M104 S{ext}"), Some("set extruder temperature"))?;
        self.line(
            &format!("M109 S{ext}"),
            Some("set temperature and wait for it to be reached"),
        )?;
        self.line(&format!("M190 S{bed}"), Some("wait for bed temperature"))?;
        self.reset_extruder()?;
        self.send_retract("retract extruder")?;
        for fan in 0..self.settings.fans {
            self.line(&format!("M106 S255 P{fan}"), Some("fan on"))?;
        }
        self.dwell(0.1)?;
        for tone in TONES {
            self.beep(tone)?;
        }

        Ok(())
    }

    pub fn send_shutdown_sequence(&mut self) -> io::Result<()> {
        self.reset_extruder()?;
        self.line("M104 S0", Some("set extruder temperature"))?;
        self.line("M140 S0", Some("set bed temperature"))?;
        for fan in 0..self.settings.fans {
            self.line(&format!("M106 S0 P{fan}"), Some("fan off"))?;
        }
        self.line("G28 X0 Y0", Some("home X and Y axis"))?;
        (self.position.x, self.position.y) = (0.0, 0.0);
        self.line("M84", Some("disable motors"))?;
        self.dwell(0.1)?;
        for tone in TONES.iter().rev() {
            self.beep(*tone)?;
        }

        Ok(())
    }

    /// Writes the layer marker and zeroes the extruder.
    pub fn begin_layer(&mut self, z: f32) -> io::Result<()> {
        self.layer_time = 0.0;
        self.comment(&format!("---- layer at z={}", format_general(z as f64)))?;
        self.reset_extruder()
    }

    pub fn reset_extruder(&mut self) -> io::Result<()> {
        self.extruded = 0.0;
        self.retracted = 0.0;
        self.line("G92 E0", Some("zero extruder"))
    }

    pub fn request_tool(&mut self, tool: u32) -> io::Result<()> {
        if tool != self.tool {
            self.tool = tool;
            self.line(&format!("T{tool}"), None)?;
        }
        Ok(())
    }

    /// Travels to `target` without extruding, retracting the filament before
    /// and pushing it back after the move.
    pub fn rapid_move(&mut self, target: Vector3<f64>) -> io::Result<()> {
        self.send_retract("retract")?;

        let mut words = vec!["G0".to_owned()];
        self.push_position(&mut words, target);
        let distance = (target - self.position).magnitude();
        self.position = target;
        self.push_feedrate(&mut words, self.settings.rapid_feedrate);
        self.send(&words, None)?;
        self.add_time(distance, self.settings.rapid_feedrate);

        self.send_unretract("unretract")
    }

    /// Extrudes a straight line to `target`.
    pub fn print_move(&mut self, target: Vector3<f64>) -> io::Result<()> {
        let distance = (target - self.position).magnitude();
        if distance == 0.0 {
            return Ok(());
        }

        let mut words = vec!["G1".to_owned()];
        self.push_position(&mut words, target);
        self.position = target;
        self.push_feedrate(&mut words, self.print_feedrate);
        self.extruded += distance / self.settings.extrusion_factor;
        words.push(format!("E{:.5}", self.e_register()));
        self.send(&words, None)?;
        self.add_time(distance, self.print_feedrate);
        Ok(())
    }

    pub fn dwell(&mut self, seconds: f64) -> io::Result<()> {
        self.total_time += seconds;
        self.layer_time += seconds;
        self.line(&format!("G4 S{}", format_general(seconds)), Some("dwell"))
    }

    pub fn comment(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "; {text}")
    }

    fn beep(&mut self, frequency: f64) -> io::Result<()> {
        self.line(&format!("M300 S{frequency:.3} P100"), Some("beep"))
    }

    fn send_retract(&mut self, comment: &str) -> io::Result<()> {
        self.retracted += self.settings.retract_distance;
        self.send_extruder_move(comment)
    }

    fn send_unretract(&mut self, comment: &str) -> io::Result<()> {
        self.retracted -= self.settings.retract_distance;
        self.send_extruder_move(comment)
    }

    fn send_extruder_move(&mut self, comment: &str) -> io::Result<()> {
        let mut words = vec!["G1".to_owned(), format!("E{:.5}", self.e_register())];
        self.push_feedrate(&mut words, self.settings.retract_feedrate);
        self.send(&words, Some(comment))?;
        self.add_time(self.settings.retract_distance, self.settings.retract_feedrate);
        Ok(())
    }

    /// Value of the firmware's E axis.
    fn e_register(&self) -> f64 {
        self.extruded - self.retracted
    }

    fn push_position(&self, words: &mut Vec<String>, target: Vector3<f64>) {
        for (axis, (old, new)) in ["X", "Y", "Z"].into_iter().zip(self.position.iter().zip(target.iter())) {
            if changed(*old, *new, 1000.0) {
                words.push(format!("{axis}{new:.3}"));
            }
        }
    }

    fn push_feedrate(&mut self, words: &mut Vec<String>, feedrate: f64) {
        if changed(self.feedrate, feedrate, 10.0) {
            self.feedrate = feedrate;
            words.push(format!("F{feedrate:.1}"));
        }
    }

    fn add_time(&mut self, distance: f64, feedrate: f64) {
        if feedrate > 0.0 {
            let seconds = distance / feedrate * 60.0;
            self.layer_time += seconds;
            self.total_time += seconds;
        }
    }

    fn line(&mut self, command: &str, comment: Option<&str>) -> io::Result<()> {
        match comment {
            Some(comment) => writeln!(self.out, "{command} ; {comment}"),
            None => writeln!(self.out, "{command}"),
        }
    }

    fn send(&mut self, words: &[String], comment: Option<&str>) -> io::Result<()> {
        self.line(&words.join(" "), comment)
    }
}

impl WriterSettings {
    pub fn from_config(config: &SliceConfig) -> Self {
        let gcode = &config.gcode;
        Self {
            extrusion_factor: config.extrusion_factor() as f64,
            print_feedrate: gcode.print_feedrate as f64,
            rapid_feedrate: gcode.rapid_feedrate as f64,
            retract_feedrate: gcode.retract_feedrate as f64,
            retract_distance: gcode.retract_distance as f64,

            extruder_temperature: gcode.extruder_temperature,
            bed_temperature: gcode.bed_temperature,
            fans: gcode.fans,
        }
    }
}

/// Compares two values at the precision they are printed with.
fn changed(old: f64, new: f64, scale: f64) -> bool {
    (old * scale).round() != (new * scale).round()
}

/// Formats a number with up to six significant digits and no trailing zeros.
pub(crate) fn format_general(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }

    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (5 - magnitude).max(0) as usize;
    let out = format!("{value:.decimals$}");
    if out.contains('.') {
        out.trim_end_matches('0').trim_end_matches('.').to_owned()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use common::config::SliceConfig;
    use nalgebra::Vector3;

    use super::{format_general, GcodeWriter, WriterSettings};

    fn writer() -> GcodeWriter<Vec<u8>> {
        GcodeWriter::new(Vec::new(), WriterSettings::from_config(&SliceConfig::default()))
    }

    fn lines(writer: GcodeWriter<Vec<u8>>) -> Vec<String> {
        let out = String::from_utf8(writer.into_inner()).unwrap();
        out.lines().map(str::to_owned).collect()
    }

    #[test]
    fn general_format() {
        assert_eq!(format_general(0.3), "0.3");
        assert_eq!(format_general(0.9000000357627869), "0.9");
        assert_eq!(format_general(12.5), "12.5");
        assert_eq!(format_general(0.1), "0.1");
        assert_eq!(format_general(0.0), "0");
    }

    #[test]
    fn init_sequence() {
        let mut gcode = writer();
        gcode.send_init_sequence("test").unwrap();
        let lines = lines(gcode);

        assert_eq!(lines[0], "; generated by test");
        assert_eq!(lines[4], "G1 Z5 F5000 ; lift nozzle");
        assert_eq!(lines[5], "M140 S60 ; set bed temperature");
        assert_eq!(lines[6], "T0");
        assert_eq!(lines[11], "G92 E0 ; zero extruder");
        assert_eq!(lines[12], "G1 E-1.00000 F1800.0 ; retract extruder");
        assert_eq!(lines[13], "M106 S255 P0 ; fan on");
        assert_eq!(lines[16], "G4 S0.1 ; dwell");
        assert_eq!(lines[17], "M300 S523.251 P100 ; beep");
        assert_eq!(lines[21], "M300 S783.991 P100 ; beep");
        assert_eq!(lines.len(), 22);
    }

    #[test]
    fn only_changed_axes_are_sent() {
        let mut gcode = writer();
        gcode.begin_layer(0.3).unwrap();
        gcode.rapid_move(Vector3::new(10.0, 10.0, 0.3)).unwrap();
        gcode.print_move(Vector3::new(20.0, 10.0, 0.3)).unwrap();
        gcode.print_move(Vector3::new(20.0, 30.0, 0.3)).unwrap();
        let lines = lines(gcode);

        assert_eq!(lines[0], "; ---- layer at z=0.3");
        assert_eq!(lines[1], "G92 E0 ; zero extruder");
        assert_eq!(lines[2], "G1 E-1.00000 F1800.0 ; retract");
        assert_eq!(lines[3], "G0 X10.000 Y10.000 Z0.300 F3600.0");
        assert_eq!(lines[4], "G1 E0.00000 F1800.0 ; unretract");

        let factor = SliceConfig::default().extrusion_factor() as f64;
        assert_eq!(lines[5], format!("G1 X20.000 E{:.5}", 10.0 / factor));
        assert_eq!(lines[6], format!("G1 Y30.000 E{:.5}", 30.0 / factor));
    }

    #[test]
    fn tool_changes_are_sent_once() {
        let mut gcode = writer();
        gcode.request_tool(0).unwrap();
        gcode.request_tool(1).unwrap();
        gcode.request_tool(1).unwrap();
        assert_eq!(gcode.tool(), 1);
        assert_eq!(lines(gcode), ["T1"]);
    }

    #[test]
    fn time_is_estimated() {
        let mut gcode = writer();
        gcode.begin_layer(0.3).unwrap();
        gcode.print_move(Vector3::new(30.0, 0.0, 0.0)).unwrap();
        // 30mm at 1800mm/min
        assert!((gcode.layer_time() - 1.0).abs() < 1e-9);
    }
}
