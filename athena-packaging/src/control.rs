// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deb822 control file primitives.

Control files consist of *paragraphs* of `Field: value` lines, with
continuation lines beginning with whitespace and paragraphs separated by
blank lines. See
<https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::error::{AthenaError, Result},
    std::{
        borrow::Cow,
        io::{BufRead, Write},
    },
};

/// A single field in a control paragraph.
///
/// The value retains its original formatting, including newlines and the
/// leading whitespace of continuation lines.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance from a field name and value.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self { name, value }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// The raw string value of this field.
    pub fn value_str(&self) -> &str {
        self.value.as_ref()
    }

    /// Iterate over whitespace-delimited words in the value.
    pub fn iter_words(&self) -> impl Iterator<Item = &str> + '_ {
        self.value.as_ref().split_ascii_whitespace()
    }

    /// Iterate over lines in the value, with leading whitespace stripped.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.value.lines().map(|line| line.trim_start())
    }

    /// Serialize this field to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        writer.write_all(b": ")?;
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// An ordered series of control fields.
///
/// Field names are case insensitive on read and case preserving on set.
/// A paragraph holds at most one occurrence of a given field.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    /// Whether the paragraph has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing any existing field of the same name.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields
            .retain(|f| !f.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set a field from name and value strings.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    /// Whether the named field is present.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    /// Obtain the named field, if present.
    pub fn field(&self, name: &str) -> Option<&ControlField<'a>> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref().eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the value of a required field or error.
    pub fn required_field_str(&self, name: &str) -> Result<&str> {
        self.field_str(name)
            .ok_or_else(|| AthenaError::ControlRequiredFieldMissing(name.to_string()))
    }

    /// Obtain the named field parsed to a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.parse::<u64>().map_err(AthenaError::ParseInt))
    }

    /// Iterate over words in the named field.
    pub fn iter_field_words(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.field(name).map(|f| f.iter_words())
    }

    /// Iterate over lines in the named field, leading whitespace stripped.
    pub fn iter_field_lines(&self, name: &str) -> Option<impl Iterator<Item = &str> + '_> {
        self.field(name).map(|f| f.iter_lines())
    }

    /// Iterate over comma-delimited values in the named field.
    pub fn iter_field_comma_delimited(
        &self,
        name: &str,
    ) -> Option<impl Iterator<Item = &str> + '_> {
        self.field(name)
            .map(|f| f.value_str().split(',').map(|v| v.trim()))
    }

    /// Serialize the paragraph to a writer.
    ///
    /// A trailing newline terminates the final field but no blank
    /// paragraph separator is emitted.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

/// Incremental parsing state for Deb822 content.
///
/// Instances are fed lines of text and emit a [ControlParagraph] whenever
/// a blank line (or end of input) completes one.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph<'static>,
    pending: Option<String>,
}

impl ControlFileParser {
    /// Feed a line into the parser.
    ///
    /// Returns a completed paragraph when the line terminates one.
    pub fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph<'static>>> {
        let pending = self.pending.take();

        if line.trim().is_empty() {
            if let Some(pending) = pending {
                self.flush_field(pending)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        let is_continuation = line.starts_with(' ') || line.starts_with('\t');

        match (pending, is_continuation) {
            // Continuation of the field being accumulated.
            (Some(pending), true) => {
                self.pending = Some(pending + line);
            }
            // A new field begins; flush the previous one.
            (Some(pending), false) => {
                self.flush_field(pending)?;
                self.pending = Some(line.to_string());
            }
            (None, false) => {
                self.pending = Some(line.to_string());
            }
            (None, true) => {
                return Err(AthenaError::ControlParseError(format!(
                    "continuation line without a field: '{}'",
                    line.trim_end()
                )));
            }
        }

        Ok(None)
    }

    /// Finish parsing, consuming self.
    ///
    /// Returns the final paragraph if unflushed state remains.
    pub fn finish(mut self) -> Result<Option<ControlParagraph<'static>>> {
        if let Some(pending) = self.pending.take() {
            self.flush_field(pending)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, raw: String) -> Result<()> {
        let (name, value) = raw.split_once(':').ok_or_else(|| {
            AthenaError::ControlParseError(format!(
                "error parsing line '{}': missing colon",
                raw.trim_end()
            ))
        })?;

        self.paragraph.set_field_from_string(
            Cow::Owned(name.trim().to_string()),
            Cow::Owned(value.trim().to_string()),
        );

        Ok(())
    }
}

/// Streaming reader of [ControlParagraph] from a [BufRead] source.
///
/// Consumed as an iterator; each item is one parsed paragraph.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    fn get_next(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = self.parser.take().expect("parser should be present");

        loop {
            let mut line = String::new();

            if self.reader.read_line(&mut line)? == 0 {
                return parser.finish();
            }

            if let Some(paragraph) = parser.write_line(&line)? {
                self.parser.replace(parser);
                return Ok(Some(paragraph));
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.parser.is_none() {
            None
        } else {
            match self.get_next() {
                Ok(Some(paragraph)) => Some(Ok(paragraph)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            }
        }
    }
}

/// A parsed control file: an ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile<'a> {
    paragraphs: Vec<ControlParagraph<'a>>,
}

impl<'a> ControlFile<'a> {
    /// Parse a control file from a reader.
    pub fn parse_reader<R: BufRead>(reader: &mut R) -> Result<Self> {
        let paragraphs =
            ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        Ok(Self { paragraphs })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::parse_reader(&mut std::io::BufReader::new(s.as_bytes()))
    }

    /// Obtain paragraphs in this control file.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph<'a>> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph<'a>> {
        self.paragraphs.into_iter()
    }
}
