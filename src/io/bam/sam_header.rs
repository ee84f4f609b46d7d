//! SAM header text: reference and read-group tables.
//!
//! The binary reference table defines reference ids and lengths. `@SQ`
//! lines only attach optional metadata (assembly, URI, species, MD5) to
//! references that already exist in that table. `@RG` lines build the
//! read-group table, which is sorted by name so ids are stable and lookup
//! is a binary search.

use super::header::RawReference;
use crate::error::{BamError, Result};
use log::{debug, warn};

/// A reference sequence: binary table entry plus `@SQ` metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSeq {
    /// Position in the binary reference table
    pub id: usize,
    /// Name (`SN`)
    pub name: String,
    /// Length in bases (`LN`)
    pub length: u32,
    /// Genome assembly identifier (`AS`)
    pub assembly_id: Option<String>,
    /// Sequence URI (`UR`)
    pub uri: Option<String>,
    /// Species (`SP`)
    pub species: Option<String>,
    /// MD5 checksum of the sequence (`M5`)
    pub md5: Option<[u8; 16]>,
}

impl ReferenceSeq {
    fn from_raw(id: usize, raw: RawReference) -> Self {
        Self {
            id,
            name: raw.name,
            length: raw.length,
            assembly_id: None,
            uri: None,
            species: None,
            md5: None,
        }
    }
}

/// A read group from an `@RG` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadGroup {
    /// Position in the name-sorted read-group table
    pub id: usize,
    /// Read group identifier (`ID`)
    pub name: String,
    /// Sample (`SM`)
    pub sample: Option<String>,
    /// Library (`LB`)
    pub library: Option<String>,
    /// Description (`DS`)
    pub description: Option<String>,
    /// Platform unit (`PU`)
    pub platform_unit: Option<String>,
    /// Predicted median insert size (`PI`), as written
    pub insert_size: Option<String>,
    /// Sequencing center (`CN`)
    pub center: Option<String>,
    /// Run date (`DT`)
    pub run_date: Option<String>,
    /// Platform (`PL`)
    pub platform: Option<String>,
}

/// Parsed BAM header, shared by a file and its records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    text: String,
    version: Option<String>,
    references: Vec<ReferenceSeq>,
    /// Reference ids sorted by name
    by_name: Vec<usize>,
    read_groups: Vec<ReadGroup>,
}

impl Header {
    /// Parse `text` against the binary reference table.
    ///
    /// # Errors
    ///
    /// Lines not starting with `@`, malformed `KEY:VALUE` fields, `@SQ`
    /// lines without `SN`/`LN` or naming an unknown reference, and duplicate
    /// read-group names are format errors. A read group without `ID` is
    /// dropped with a warning.
    ///
    /// # Example
    ///
    /// ```
    /// use bamread::io::bam::header::RawReference;
    /// use bamread::io::bam::Header;
    ///
    /// let refs = vec![RawReference { name: "chr1".into(), length: 1000 }];
    /// let text = "@HD\tVN:1.4\n@SQ\tSN:chr1\tLN:1000\n@RG\tID:rg1\tSM:sample1\n";
    /// let header = Header::parse(text.to_string(), refs).unwrap();
    ///
    /// assert_eq!(header.version(), Some("1.4"));
    /// assert_eq!(header.references()[0].name, "chr1");
    /// assert_eq!(header.read_group_by_name("rg1").unwrap().sample.as_deref(), Some("sample1"));
    /// ```
    pub fn parse(text: String, raw_references: Vec<RawReference>) -> Result<Self> {
        let references: Vec<ReferenceSeq> = raw_references
            .into_iter()
            .enumerate()
            .map(|(id, raw)| ReferenceSeq::from_raw(id, raw))
            .collect();
        let mut by_name: Vec<usize> = (0..references.len()).collect();
        by_name.sort_by(|&a, &b| references[a].name.cmp(&references[b].name));

        let mut header = Header {
            text: String::new(),
            version: None,
            references,
            by_name,
            read_groups: Vec::new(),
        };

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            header
                .parse_line(line)
                .map_err(|e| match e {
                    BamError::Format(m) => {
                        BamError::Format(format!("SAM header line {}: {}", lineno + 1, m))
                    }
                    other => other,
                })?;
        }

        header.finish_read_groups()?;
        header.text = text;

        debug!(
            "Parsed BAM header: {} references, {} read groups",
            header.references.len(),
            header.read_groups.len()
        );
        Ok(header)
    }

    fn parse_line(&mut self, line: &str) -> Result<()> {
        let body = line
            .strip_prefix('@')
            .ok_or_else(|| BamError::Format("line does not start with '@'".to_string()))?;
        let mut fields = body.split('\t');
        let kind = fields.next().unwrap_or_default();

        match kind {
            "HD" => {
                for field in fields {
                    if let Some((key, value)) = split_field(field, false)? {
                        if key == "VN" {
                            self.version = Some(value.to_string());
                        }
                    }
                }
            }
            "SQ" => self.parse_sq(fields)?,
            "RG" => self.parse_rg(fields)?,
            other => debug!("Skipping SAM header line type @{}", other),
        }
        Ok(())
    }

    fn parse_sq<'a>(&mut self, fields: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut name = None;
        let mut length = 0u64;
        let mut assembly_id = None;
        let mut uri = None;
        let mut species = None;
        let mut md5 = None;

        for field in fields {
            let Some((key, value)) = split_field(field, true)? else {
                continue;
            };
            match key {
                "SN" => name = Some(value),
                "LN" => length = value.parse().unwrap_or(0),
                "AS" => assembly_id = Some(value.to_string()),
                "UR" => uri = Some(value.to_string()),
                "SP" => species = Some(value.to_string()),
                "M5" | "MD5" => {
                    md5 = parse_md5(value);
                    if md5.is_none() {
                        debug!("Ignoring malformed @SQ checksum {:?}", value);
                    }
                }
                _ => {}
            }
        }

        let name = match name {
            Some(name) if length != 0 => name,
            _ => {
                return Err(BamError::Format(
                    "@SQ requires SN and a non-zero LN".to_string(),
                ))
            }
        };

        let refs = &self.references;
        let id = self
            .by_name
            .binary_search_by(|&i| refs[i].name.as_str().cmp(name))
            .map(|pos| self.by_name[pos])
            .map_err(|_| {
                BamError::Format(format!("@SQ names unknown reference {:?}", name))
            })?;

        let reference = &mut self.references[id];
        reference.assembly_id = assembly_id;
        reference.uri = uri;
        reference.species = species;
        reference.md5 = md5;
        Ok(())
    }

    fn parse_rg<'a>(&mut self, fields: impl Iterator<Item = &'a str>) -> Result<()> {
        let mut group = ReadGroup::default();
        let mut has_id = false;

        for field in fields {
            let Some((key, value)) = split_field(field, false)? else {
                continue;
            };
            let value = strip_quotes(value).to_string();
            match key {
                "ID" => {
                    group.name = value;
                    has_id = true;
                }
                "SM" => group.sample = Some(value),
                "LB" => group.library = Some(value),
                "DS" => group.description = Some(value),
                "PU" => group.platform_unit = Some(value),
                "PI" => group.insert_size = Some(value),
                "CN" => group.center = Some(value),
                "DT" => group.run_date = Some(value),
                "PL" => group.platform = Some(value),
                _ => {}
            }
        }

        if has_id {
            self.read_groups.push(group);
        } else {
            warn!("Read Group is missing ID in BAM header; dropping it");
        }
        Ok(())
    }

    fn finish_read_groups(&mut self) -> Result<()> {
        self.read_groups.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = self.read_groups.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(BamError::Format(format!(
                "duplicate read group {:?}",
                dup[0].name
            )));
        }
        for (id, group) in self.read_groups.iter_mut().enumerate() {
            group.id = id;
        }
        Ok(())
    }

    /// Header text as parsed.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// `@HD VN` value.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// References in id order.
    pub fn references(&self) -> &[ReferenceSeq] {
        &self.references
    }

    /// Reference by id.
    pub fn reference(&self, id: usize) -> Option<&ReferenceSeq> {
        self.references.get(id)
    }

    /// Reference by name.
    pub fn reference_by_name(&self, name: &str) -> Option<&ReferenceSeq> {
        self.by_name
            .binary_search_by(|&i| self.references[i].name.as_str().cmp(name))
            .ok()
            .map(|pos| &self.references[self.by_name[pos]])
    }

    /// Number of references.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Read groups in name order; `read_groups()[i].id == i`.
    pub fn read_groups(&self) -> &[ReadGroup] {
        &self.read_groups
    }

    /// Read group by `ID`.
    pub fn read_group_by_name(&self, name: &str) -> Option<&ReadGroup> {
        self.read_groups
            .binary_search_by(|g| g.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.read_groups[i])
    }
}

/// Split `KEY:VALUE`, trimming the value. Blank fields yield `None`.
fn split_field(field: &str, allow_md5_key: bool) -> Result<Option<(&str, &str)>> {
    let field = field.trim();
    if field.is_empty() {
        return Ok(None);
    }
    let (key, value) = field
        .split_once(':')
        .ok_or_else(|| BamError::Format(format!("field {:?} is not KEY:VALUE", field)))?;
    if key.len() != 2 && !(allow_md5_key && key == "MD5") {
        return Err(BamError::Format(format!(
            "field {:?} has a malformed key",
            field
        )));
    }
    Ok(Some((key, value.trim())))
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    match bytes {
        [q @ (b'"' | b'\''), .., last] if last == q => &value[1..value.len() - 1],
        _ => value,
    }
}

/// 32 hex digits, optionally quoted, any case.
fn parse_md5(value: &str) -> Option<[u8; 16]> {
    let hex = strip_quotes(value).as_bytes();
    if hex.len() != 32 {
        return None;
    }
    let nibble = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks_exact(2).enumerate() {
        out[i] = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Some(out)
}
