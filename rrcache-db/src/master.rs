// Copyright 2026 rrcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Master-file style serialization of a store.
//!
//! ```text
//! ; rrcache dump
//! $DATE 1700000000
//! example. 300 IN A 192.0.2.1
//! example. 300 IN MX 10 mail.example.
//! ```
//!
//! Each record line carries the remaining TTL at dump time. Loading recomputes the expiry from the load time.
//!
//! A `;` starts a comment unless it is inside a `"..."` run. Rdata that cannot be written as is (empty, with line
//! breaks or surrounding whitespace, or that would be cut by a comment) is written in the generic form of RFC 3597,
//! `\# <length> <hex>`.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use rrcache_common::{
    error::{Error, ErrorKind, Result},
    time::StdTime,
};

use crate::{
    db::Database,
    name::Name,
    rdata::{RdataClass, RdataType, Rdataset},
};

/// Syntax errors of a master file.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MasterError {
    /// A record line has fewer than five fields.
    #[error("expected `<name> <ttl> <class> <type> <rdata>`")]
    MissingField,
    /// The TTL is not a number.
    #[error("invalid ttl `{0}`")]
    Ttl(String),
    /// The owner name is invalid.
    #[error("invalid owner name `{0}`")]
    Name(String),
    /// The class is unknown or not the class of the store.
    #[error("class `{found}` does not match store class {expected}")]
    Class {
        /// Class found on the line.
        found: String,
        /// Class of the store.
        expected: RdataClass,
    },
    /// The type is unknown.
    #[error("invalid type `{0}`")]
    Type(String),
    /// A `$DATE` directive without a valid time.
    #[error("invalid $DATE directive")]
    Date,
    /// Malformed generic rdata.
    #[error("invalid generic rdata `{0}`")]
    Generic(String),
    /// A directive rrcache does not know.
    #[error("unknown directive `{0}`")]
    Directive(String),
}

/// Split off the first whitespace separated field.
fn field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(s.split_once(char::is_whitespace).unwrap_or((s, "")))
}

/// Cut the comment off `line`. A `;` inside a quoted run does not start one.
fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => return &line[..i],
            _ => {}
        }
    }
    line
}

const GENERIC: &str = "\\#";

/// Whether `rdata` reads back unchanged when written as is.
fn is_verbatim(rdata: &str) -> bool {
    !rdata.is_empty()
        && rdata.trim() == rdata
        && !rdata.contains(['\n', '\r'])
        && !rdata.starts_with(GENERIC)
        && strip_comment(rdata).len() == rdata.len()
}

fn encode_generic(rdata: &str) -> String {
    let mut out = format!("{GENERIC} {}", rdata.len());
    if !rdata.is_empty() {
        out.push(' ');
        for b in rdata.bytes() {
            out.push_str(&format!("{b:02x}"));
        }
    }
    out
}

fn decode_generic(rdata: &str) -> std::result::Result<Option<String>, MasterError> {
    let Some(rest) = rdata.strip_prefix(GENERIC) else {
        return Ok(None);
    };
    let invalid = || MasterError::Generic(rdata.to_string());
    let (len, hex) = field(rest).ok_or_else(invalid)?;
    let len = len.parse::<usize>().map_err(|_| invalid())?;
    let hex = hex.split_whitespace().collect::<String>();
    if hex.len() != len * 2 || !hex.is_ascii() {
        return Err(invalid());
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;
    String::from_utf8(bytes).map(Some).map_err(|_| invalid())
}

#[derive(Debug, PartialEq, Eq)]
struct Record {
    name: Name,
    ttl: u32,
    rtype: RdataType,
    covers: RdataType,
    rdata: String,
}

fn parse_record(line: &str, class: RdataClass) -> std::result::Result<Record, MasterError> {
    let (name, rest) = field(line).ok_or(MasterError::MissingField)?;
    let (ttl, rest) = field(rest).ok_or(MasterError::MissingField)?;
    let (rclass, rest) = field(rest).ok_or(MasterError::MissingField)?;
    let (rtype, rest) = field(rest).ok_or(MasterError::MissingField)?;
    let rdata = rest.trim();
    if rdata.is_empty() {
        return Err(MasterError::MissingField);
    }

    let name = name.parse::<Name>().map_err(|_| MasterError::Name(name.to_string()))?;
    let ttl = ttl.parse::<u32>().map_err(|_| MasterError::Ttl(ttl.to_string()))?;
    match rclass.parse::<RdataClass>() {
        Ok(c) if c == class => {}
        _ => {
            return Err(MasterError::Class {
                found: rclass.to_string(),
                expected: class,
            })
        }
    }
    let rtype = rtype.parse::<RdataType>().map_err(|_| MasterError::Type(rtype.to_string()))?;
    let rdata = match decode_generic(rdata)? {
        Some(decoded) => decoded,
        None => rdata.to_string(),
    };
    // Signatures are kept apart by the type they cover, which is their first rdata field.
    let covers = if rtype == RdataType::RRSIG {
        let (covered, _) = field(&rdata).ok_or(MasterError::MissingField)?;
        covered
            .parse::<RdataType>()
            .map_err(|_| MasterError::Type(covered.to_string()))?
    } else {
        RdataType::NONE
    };

    Ok(Record {
        name,
        ttl,
        rtype,
        covers,
        rdata,
    })
}

fn parse(text: &str, class: RdataClass) -> std::result::Result<Vec<Record>, (usize, MasterError)> {
    let mut records = vec![];
    for (index, line) in text.lines().enumerate() {
        let lineno = index + 1;
        let line = strip_comment(line).trim_end();
        if line.trim().is_empty() {
            continue;
        }
        if let Some(directive) = line.strip_prefix('$') {
            let (keyword, value) = field(directive).unwrap_or((directive, ""));
            match keyword {
                "DATE" => {
                    value.trim().parse::<StdTime>().map_err(|_| (lineno, MasterError::Date))?;
                }
                _ => return Err((lineno, MasterError::Directive(keyword.to_string()))),
            }
            continue;
        }
        records.push(parse_record(line, class).map_err(|e| (lineno, e))?);
    }
    Ok(records)
}

/// Populate `db` from the master file at `path`, returns the number of rdatasets added.
///
/// The whole file is parsed before anything is added, so a malformed file leaves the store untouched. Lines of the
/// same owner and type are grouped into one rdataset with the smallest TTL among them.
pub fn load<D>(db: &D, path: &Path, now: StdTime) -> Result<usize>
where
    D: Database + ?Sized,
{
    let text = std::fs::read_to_string(path).map_err(|e| Error::io_error(e).with_context("path", path.display()))?;
    let records = parse(&text, db.class()).map_err(|(line, e)| {
        Error::new(ErrorKind::Parse, "malformed master file")
            .with_context("path", path.display())
            .with_context("line", line)
            .with_source(e)
    })?;

    let mut groups: BTreeMap<(Name, RdataType, RdataType), (u32, Vec<String>)> = BTreeMap::new();
    for record in records {
        let (ttl, rdata) = groups
            .entry((record.name, record.rtype, record.covers))
            .or_insert((record.ttl, vec![]));
        *ttl = (*ttl).min(record.ttl);
        if !rdata.contains(&record.rdata) {
            rdata.push(record.rdata);
        }
    }

    let mut added = 0;
    for ((name, rtype, covers), (ttl, rdata)) in groups {
        let Some(node) = db.find_node(&name, true)? else {
            return Err(Error::unexpected("node creation returned nothing").with_context("name", name));
        };
        let res = db.add_rdataset(&node, Rdataset::new(rtype, ttl, rdata, now).with_covers(covers), now);
        db.detach_node(node);
        res?;
        added += 1;
    }
    tracing::debug!("[master] loaded {added} rdatasets from {}", path.display());
    Ok(added)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write every rdataset of `db` that is servable at `now` to `path`, returns the number of rdatasets written.
///
/// The file is written aside and renamed into place, so readers never see a partial dump.
pub fn dump<D>(db: &D, path: &Path, now: StdTime) -> Result<usize>
where
    D: Database + ?Sized,
{
    let temp = temp_path(path);
    let res = write(db, &temp, now).and_then(|written| {
        std::fs::rename(&temp, path)?;
        Ok(written)
    });
    match res {
        Ok(written) => {
            tracing::debug!("[master] dumped {written} rdatasets to {}", path.display());
            Ok(written)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&temp);
            Err(e.with_context("path", path.display()))
        }
    }
}

fn write<D>(db: &D, path: &Path, now: StdTime) -> Result<usize>
where
    D: Database + ?Sized,
{
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "; rrcache dump")?;
    writeln!(writer, "$DATE {now}")?;

    let class = db.class();
    let mut written = 0;
    let mut next = db.first_node()?;
    while let Some(node) = next {
        let mut rdatasets = db.all_rdatasets(&node)?;
        rdatasets.retain(|r| r.is_active(now));
        rdatasets.sort_by_key(|r| (r.rtype, r.covers));
        for rdataset in &rdatasets {
            let ttl = rdataset.expire - now;
            for rdata in &rdataset.rdata {
                let name = node.name();
                let rtype = rdataset.rtype;
                match is_verbatim(rdata) {
                    true => writeln!(writer, "{name} {ttl} {class} {rtype} {rdata}")?,
                    false => writeln!(writer, "{name} {ttl} {class} {rtype} {}", encode_generic(rdata))?,
                }
            }
            written += 1;
        }
        next = db.next_node(node.name())?;
        db.detach_node(node);
    }

    writer.flush()?;
    Ok(written)
}
