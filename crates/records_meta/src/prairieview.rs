//! PrairieView XML scan metadata.
//!
//! Reads the scan header, the system id, the top-level `PVStateShard` and the
//! plane/channel layout of the first `Sequence`. Per-frame state shards are
//! ignored.
//!
//! Field naming:
//! - `<PVStateValue key="opticalZoom" value="2"/>` → `optical_zoom`
//! - `<IndexedValue description="Imaging"/>` inside `laserPower` → `laser_power.imaging`
//! - a `SubindexedValues index="XAxis"` with a single child → `position_current.x_axis`
//! - with several children → `position_current.z_axis_z_focus`, ... plus the
//!   first child under the plain `position_current.z_axis` name
//! - first sequence frame count → `planes`, files in its first frame → `channels`
//! - one unit record per `Frame` of every sequence, carrying `sequence` and
//!   the frame's `relative_time` / `absolute_time` when present

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{MetaError, MetaResult};
use crate::parser::MetadataParser;
use crate::record::{field_name, RecordSet, UnitRecord};

/// Format identifier for PrairieView scans.
pub const PRAIRIEVIEW_FORMAT: &str = "prairieview";

/// Parser for PrairieView `.xml` scan files.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrairieViewParser;

impl MetadataParser for PrairieViewParser {
    fn format(&self) -> &str {
        PRAIRIEVIEW_FORMAT
    }

    fn parse_str(&self, path: &Path, content: &str) -> MetaResult<RecordSet> {
        ScanReader::new(path).read(content)
    }
}

struct ScanReader<'p> {
    path: &'p Path,
    record: RecordSet,
    stack: Vec<String>,
    seen_scan: bool,
    state_key: Option<String>,
    group: Option<(String, Vec<(String, String)>)>,
    sequences: usize,
    frames: usize,
    channels: usize,
}

impl<'p> ScanReader<'p> {
    fn new(path: &'p Path) -> Self {
        Self {
            path,
            record: RecordSet::new(path, PRAIRIEVIEW_FORMAT),
            stack: Vec::new(),
            seen_scan: false,
            state_key: None,
            group: None,
            sequences: 0,
            frames: 0,
            channels: 0,
        }
    }

    fn read(mut self, content: &str) -> MetaResult<RecordSet> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    self.open(e, false)?;
                    self.stack.push(local_name(e));
                }
                Ok(Event::Empty(ref e)) => self.open(e, true)?,
                Ok(Event::End(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    self.stack.pop();
                    self.close(&name)?;
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(self.malformed(e.to_string())),
                _ => {}
            }
        }

        if !self.seen_scan {
            return Err(self.malformed("no PVScan root element"));
        }

        if self.sequences > 0 {
            self.record.insert("planes", self.frames.to_string());
            self.record.insert("channels", self.channels.to_string());
        }

        Ok(self.record)
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> MetaResult<()> {
        let name = local_name(e);
        let parent = self.stack.last().map(String::as_str);

        match name.as_str() {
            "PVScan" => {
                self.seen_scan = true;
                for key in ["version", "date", "notes"] {
                    if let Some(value) = self.attr(e, key)? {
                        self.record.insert(key, value);
                    }
                }
            }
            "SystemIDs" => {
                if let Some(value) = self.attr(e, "SystemID")? {
                    self.record.insert("system_id", value);
                }
            }
            "PVStateValue" if self.in_top_level_shard() => {
                let key = self
                    .attr(e, "key")?
                    .ok_or_else(|| self.malformed("PVStateValue without key"))?;
                let key = field_name(&key);
                if let Some(value) = self.attr(e, "value")? {
                    self.record.insert(key.clone(), value);
                }
                if !empty {
                    self.state_key = Some(key);
                }
            }
            "IndexedValue" if parent == Some("PVStateValue") => {
                if let Some(state) = self.state_key.clone() {
                    let label = self.descriptive_name(e)?;
                    let value = self.required_attr(e, "value")?;
                    self.record.insert(format!("{}.{}", state, label), value);
                }
            }
            "SubindexedValues" if self.state_key.is_some() => {
                let label = self.descriptive_name(e)?;
                self.group = Some((label, Vec::new()));
            }
            "SubindexedValue" if self.group.is_some() => {
                let label = self.descriptive_name(e)?;
                let value = self.required_attr(e, "value")?;
                if let Some((_, entries)) = self.group.as_mut() {
                    entries.push((label, value));
                }
            }
            "Sequence" => {
                self.sequences += 1;
            }
            "Frame" if parent == Some("Sequence") => {
                self.push_frame(e)?;
                if self.sequences == 1 {
                    self.frames += 1;
                }
            }
            "File" if self.sequences == 1 && self.frames == 1 && parent == Some("Frame") => {
                self.channels += 1;
            }
            _ => {}
        }

        Ok(())
    }

    fn close(&mut self, name: &str) -> MetaResult<()> {
        match name {
            "PVStateValue" => self.state_key = None,
            "SubindexedValues" => {
                if let (Some(state), Some((label, entries))) = (&self.state_key, self.group.take())
                {
                    if entries.len() == 1 {
                        let (_, value) = &entries[0];
                        self.record
                            .insert(format!("{}.{}", state, label), value.clone());
                    } else {
                        if let Some((_, first)) = entries.first() {
                            self.record
                                .insert(format!("{}.{}", state, label), first.clone());
                        }
                        for (sub, value) in entries {
                            self.record
                                .insert(format!("{}.{}_{}", state, label, sub), value);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn push_frame(&mut self, e: &BytesStart<'_>) -> MetaResult<()> {
        let mut unit = UnitRecord::new();
        unit.insert("sequence".to_string(), self.sequences.to_string());
        for (key, field) in [("relativeTime", "relative_time"), ("absoluteTime", "absolute_time")] {
            if let Some(raw) = self.attr(e, key)? {
                if let Err(err) = raw.trim().parse::<f64>() {
                    return Err(MetaError::InvalidValue {
                        path: self.path.to_path_buf(),
                        field: format!("frames[{}].{}", self.record.units.len(), field),
                        message: format!("'{}' is not a number ({})", raw, err),
                    });
                }
                unit.insert(field.to_string(), raw);
            }
        }
        self.record.units.push(unit);
        Ok(())
    }

    fn in_top_level_shard(&self) -> bool {
        self.stack.len() == 2
            && self.stack[0] == "PVScan"
            && self.stack[1] == "PVStateShard"
    }

    fn descriptive_name(&self, e: &BytesStart<'_>) -> MetaResult<String> {
        for key in ["description", "subindex", "index"] {
            if let Some(value) = self.attr(e, key)? {
                return Ok(field_name(&value));
            }
        }
        Err(self.malformed(format!(
            "no descriptive attribute on <{}>",
            local_name(e)
        )))
    }

    fn required_attr(&self, e: &BytesStart<'_>, key: &str) -> MetaResult<String> {
        self.attr(e, key)?.ok_or_else(|| {
            self.malformed(format!("<{}> without '{}' attribute", local_name(e), key))
        })
    }

    fn attr(&self, e: &BytesStart<'_>, key: &str) -> MetaResult<Option<String>> {
        match e.try_get_attribute(key) {
            Ok(Some(attr)) => attr
                .unescape_value()
                .map(|v| Some(v.into_owned()))
                .map_err(|err| self.malformed(err.to_string())),
            Ok(None) => Ok(None),
            Err(err) => Err(self.malformed(err.to_string())),
        }
    }

    fn malformed(&self, message: impl Into<String>) -> MetaError {
        MetaError::Malformed {
            format: PRAIRIEVIEW_FORMAT.to_string(),
            path: self.path.to_path_buf(),
            message: message.into(),
        }
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCAN: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<PVScan version="5.5.64.600" date="3/1/2024 10:00:00 AM" notes="">
  <SystemIDs SystemID="4172">
    <SystemID SystemID="4172" Description="Bruker" />
  </SystemIDs>
  <PVStateShard>
    <PVStateValue key="objectiveLens" value="Nikon 16X" />
    <PVStateValue key="framePeriod" value="0.033" />
    <PVStateValue key="laserPower">
      <IndexedValue index="0" value="42" description="Imaging" />
    </PVStateValue>
    <PVStateValue key="positionCurrent">
      <SubindexedValues index="XAxis">
        <SubindexedValue subindex="0" value="-1024.5" />
      </SubindexedValues>
      <SubindexedValues index="ZAxis">
        <SubindexedValue subindex="0" value="150.25" description="Z Focus" />
        <SubindexedValue subindex="1" value="0" description="Bot" />
      </SubindexedValues>
    </PVStateValue>
  </PVStateShard>
  <Sequence type="TSeries ZSeries Element" cycle="1">
    <Frame relativeTime="0" absoluteTime="1.0" index="1">
      <File channel="2" channelName="Ch2" filename="a.ome.tif" />
      <File channel="3" channelName="Ch3" filename="b.ome.tif" />
      <PVStateShard>
        <PVStateValue key="objectiveLens" value="overridden" />
      </PVStateShard>
    </Frame>
    <Frame relativeTime="0.1" absoluteTime="1.1" index="2">
      <File channel="2" channelName="Ch2" filename="c.ome.tif" />
      <File channel="3" channelName="Ch3" filename="d.ome.tif" />
    </Frame>
  </Sequence>
</PVScan>"#;

    fn parse(content: &str) -> MetaResult<RecordSet> {
        PrairieViewParser.parse_str(Path::new("scan.xml"), content)
    }

    #[test]
    fn test_scan_fields() {
        let record = parse(SCAN).unwrap();
        assert_eq!(record.get("version"), Some("5.5.64.600"));
        assert_eq!(record.get("system_id"), Some("4172"));
        assert_eq!(record.get("objective_lens"), Some("Nikon 16X"));
        assert_eq!(record.number("frame_period").unwrap(), 0.033);
        assert_eq!(record.get("laser_power.imaging"), Some("42"));
    }

    #[test]
    fn test_subindexed_positions() {
        let record = parse(SCAN).unwrap();
        assert_eq!(record.number("position_current.x_axis").unwrap(), -1024.5);
        assert_eq!(record.number("position_current.z_axis_z_focus").unwrap(), 150.25);
        assert_eq!(record.get("position_current.z_axis_bot"), Some("0"));
    }

    #[test]
    fn test_sequence_layout() {
        let record = parse(SCAN).unwrap();
        assert_eq!(record.count("planes").unwrap(), 2);
        assert_eq!(record.count("channels").unwrap(), 2);
    }

    #[test]
    fn test_multi_subindex_without_focus_keeps_first_value() {
        let scan = SCAN
            .replace(r#" description="Z Focus""#, "")
            .replace(r#" description="Bot""#, "");
        let record = parse(&scan).unwrap();
        assert_eq!(record.get("position_current.z_axis_0"), Some("150.25"));
        assert_eq!(record.get("position_current.z_axis_1"), Some("0"));
        assert_eq!(record.number("position_current.z_axis").unwrap(), 150.25);
    }

    #[test]
    fn test_frame_times() {
        let record = parse(SCAN).unwrap();
        assert_eq!(record.unit_count(), 2);
        assert_eq!(record.unit_field(0, "sequence").unwrap(), "1");
        assert_eq!(record.unit_field(0, "relative_time").unwrap(), "0");
        assert_eq!(record.unit_field(1, "relative_time").unwrap(), "0.1");
        assert_eq!(record.unit_field(1, "absolute_time").unwrap(), "1.1");
    }

    #[test]
    fn test_frame_times_skip_missing_and_span_sequences() {
        let scan = SCAN.replace(
            "</Sequence>\n</PVScan>",
            "</Sequence>\n  <Sequence cycle=\"2\">\n    <Frame absoluteTime=\"2.5\" index=\"1\" />\n  </Sequence>\n</PVScan>",
        );
        let record = parse(&scan).unwrap();
        assert_eq!(record.unit_count(), 3);
        assert_eq!(record.unit_field(2, "sequence").unwrap(), "2");
        assert_eq!(record.unit_field(2, "absolute_time").unwrap(), "2.5");
        assert!(record.unit_field(2, "relative_time").is_err());
        assert_eq!(record.count("planes").unwrap(), 2);
    }

    #[test]
    fn test_frame_time_must_be_numeric() {
        let scan = SCAN.replace(r#"relativeTime="0.1""#, r#"relativeTime="soon""#);
        match parse(&scan) {
            Err(MetaError::InvalidValue { field, .. }) => {
                assert_eq!(field, "frames[1].relative_time")
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_not_a_scan() {
        assert!(matches!(
            parse("<Other/>"),
            Err(MetaError::Malformed { .. })
        ));
    }
}
