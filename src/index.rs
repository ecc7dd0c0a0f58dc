//! index - плоский текстовый индекс контрольных сумм артефактов.
//!
//! Формат (совместим с `sha384sum`):
//!   <sha384-hex, 96 символов>  <filename>
//! разделитель - ровно два ASCII-пробела, одна строка на файл.
//!
//! Ключ сортировки восстанавливается из имени файла по схеме каталога:
//!   FilenameScheme::Block    - `*-<block>.json.zst` (снапшоты, деревья сети)
//!   FilenameScheme::NodeTree - `*-<block>-<0x address>-<node index>.json.zst`
//!
//! Индекс перезаписывается целиком (tmp+rename). Одновременная запись
//! из нескольких процессов не поддерживается: single writer per directory.

use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CacheError;
use crate::util::write_atomic;

/// Separator between checksum and filename.
pub const ENTRY_SEPARATOR: &str = "  ";

/// Required suffix of every indexed filename.
pub const ARTIFACT_SUFFIX: &str = ".json.zst";

/// How a directory's filenames encode their sort key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FilenameScheme {
    /// `<anything>-<block>.json.zst`
    #[default]
    Block,
    /// `<anything>-<block>-<0x address>-<node index>.json.zst`
    NodeTree,
}

impl FilenameScheme {
    /// (block number, node index) of a filename; node index is None for `Block`.
    pub fn key_of(self, filename: &str) -> Result<(u64, Option<u64>)> {
        match self {
            FilenameScheme::Block => Ok((block_number_from_filename(filename)?, None)),
            FilenameScheme::NodeTree => {
                let (block, index) = node_tree_key_from_filename(filename)?;
                Ok((block as u64, Some(index)))
            }
        }
    }
}

/// One parsed index line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub checksum_hex: String,
    pub filename: String,
    pub block_number: u64,
    /// Only for node tree directories.
    pub node_index: Option<u64>,
}

impl ChecksumEntry {
    pub fn new(checksum_hex: impl Into<String>, filename: impl Into<String>) -> Result<Self> {
        Self::with_scheme(checksum_hex, filename, FilenameScheme::Block)
    }

    pub fn with_scheme(
        checksum_hex: impl Into<String>,
        filename: impl Into<String>,
        scheme: FilenameScheme,
    ) -> Result<Self> {
        let filename = filename.into();
        let (block_number, node_index) = scheme.key_of(&filename)?;
        Ok(Self {
            checksum_hex: checksum_hex.into(),
            filename,
            block_number,
            node_index,
        })
    }

    /// Render as an index line.
    pub fn to_line(&self) -> String {
        format!("{}{}{}", self.checksum_hex, ENTRY_SEPARATOR, self.filename)
    }

    fn sort_key(&self) -> (u64, u64) {
        (self.block_number, self.node_index.unwrap_or(0))
    }
}

/// Handle on one index file. Holds no state besides the path.
#[derive(Clone, Debug)]
pub struct ChecksumIndex {
    path: PathBuf,
}

impl ChecksumIndex {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read non-blank lines in on-disk order. Ok(None) if the index does not exist yet.
    pub fn parse(&self) -> Result<Option<Vec<String>>> {
        let raw = match fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("read checksum table {}", self.path.display()))
            }
        };
        let text = String::from_utf8_lossy(&raw);
        let lines = text
            .split('\n')
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect();
        Ok(Some(lines))
    }

    /// Split a `Block`-scheme line into checksum and filename.
    pub fn parse_entry(line: &str) -> Result<ChecksumEntry> {
        Self::parse_entry_with(line, FilenameScheme::Block)
    }

    /// Split a line into checksum and filename, recovering the key from the filename.
    pub fn parse_entry_with(line: &str, scheme: FilenameScheme) -> Result<ChecksumEntry> {
        let elems: Vec<&str> = line.split(ENTRY_SEPARATOR).collect();
        if elems.len() != 2 {
            return Err(CacheError::index_corruption(
                line,
                format!("expected 2 elements, but got {}", elems.len()),
            )
            .into());
        }
        // CRLF-индексы (редактировали руками) - срезаем только хвостовой \r
        let filename = elems[1].trim_end_matches('\r');
        let (block_number, node_index) = scheme
            .key_of(filename)
            .map_err(|e| CacheError::index_corruption(line, format!("{:#}", e)))?;
        Ok(ChecksumEntry {
            checksum_hex: elems[0].to_string(),
            filename: filename.to_string(),
            block_number,
            node_index,
        })
    }

    /// Parse every line; the first failure is returned.
    pub fn parse_all(lines: &[String]) -> Result<Vec<ChecksumEntry>> {
        Self::parse_all_with(lines, FilenameScheme::Block)
    }

    pub fn parse_all_with(lines: &[String], scheme: FilenameScheme) -> Result<Vec<ChecksumEntry>> {
        lines.iter().map(|l| Self::parse_entry_with(l, scheme)).collect()
    }

    /// Stable ascending sort by block number. All-or-nothing: on any parse error
    /// `lines` is left untouched and the first error is returned.
    pub fn sort(lines: &mut Vec<String>) -> Result<()> {
        Self::sort_with(lines, FilenameScheme::Block)
    }

    /// `sort` for any scheme; node trees order by (block, node index).
    pub fn sort_with(lines: &mut Vec<String>, scheme: FilenameScheme) -> Result<()> {
        let entries = Self::parse_all_with(lines, scheme)?;
        let mut keyed: Vec<((u64, u64), String)> = entries
            .iter()
            .map(ChecksumEntry::sort_key)
            .zip(lines.drain(..))
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        lines.extend(keyed.into_iter().map(|(_, l)| l));
        Ok(())
    }

    /// Replace the first line for `entry.filename` in place (dropping any later
    /// duplicates of that filename), or append. Does not re-sort.
    pub fn upsert(lines: &mut Vec<String>, entry: &ChecksumEntry) {
        let new_line = entry.to_line();
        let mut replaced = false;
        lines.retain_mut(|line| {
            if line_filename(line) != Some(entry.filename.as_str()) {
                return true;
            }
            if replaced {
                return false;
            }
            *line = new_line.clone();
            replaced = true;
            true
        });
        if !replaced {
            lines.push(new_line);
        }
    }

    /// Replace the index file with `lines` joined by "\n".
    pub fn write(&self, lines: &[String]) -> Result<()> {
        let contents = lines.join("\n");
        write_atomic(&self.path, contents.as_bytes())
            .with_context(|| format!("write checksum table {}", self.path.display()))
    }
}

/// Filename part of a line, if the line has the two-space layout.
fn line_filename(line: &str) -> Option<&str> {
    line.split_once(ENTRY_SEPARATOR)
        .map(|(_, f)| f.trim_end_matches('\r'))
}

fn bad_format(filename: &str) -> anyhow::Error {
    anyhow!("filename ({}) did not match the expected format", filename)
}

fn ascii_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Block number from `<anything>-<digits>.json.zst`.
pub fn block_number_from_filename(filename: &str) -> Result<u64> {
    let stem = filename
        .strip_suffix(ARTIFACT_SUFFIX)
        .ok_or_else(|| bad_format(filename))?;
    let (_, digits) = stem.rsplit_once('-').ok_or_else(|| bad_format(filename))?;
    if !ascii_digits(digits) {
        return Err(bad_format(filename));
    }
    digits
        .parse::<u64>()
        .map_err(|_| anyhow!("block number ({}) could not be parsed to a number", digits))
}

/// (block number, node index) from `<anything>-<block>-<0x + 40 hex>-<index>.json.zst`.
pub fn node_tree_key_from_filename(filename: &str) -> Result<(u32, u64)> {
    let stem = filename
        .strip_suffix(ARTIFACT_SUFFIX)
        .ok_or_else(|| bad_format(filename))?;
    let (rest, index) = stem.rsplit_once('-').ok_or_else(|| bad_format(filename))?;
    let (rest, address) = rest.rsplit_once('-').ok_or_else(|| bad_format(filename))?;
    let (_, block) = rest.rsplit_once('-').ok_or_else(|| bad_format(filename))?;

    let hex_ok = address
        .strip_prefix("0x")
        .map(|h| h.len() == 40 && h.bytes().all(|b| b.is_ascii_hexdigit()))
        .unwrap_or(false);
    if !hex_ok || !ascii_digits(block) || !ascii_digits(index) {
        return Err(bad_format(filename));
    }
    let block = block
        .parse::<u32>()
        .map_err(|_| anyhow!("block number ({}) could not be parsed to a number", block))?;
    let index = index
        .parse::<u64>()
        .map_err(|_| anyhow!("node index ({}) could not be parsed to a number", index))?;
    Ok((block, index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(sum: char, file: &str) -> String {
        format!("{}  {}", sum.to_string().repeat(96), file)
    }

    #[test]
    fn block_number_extraction() {
        assert_eq!(block_number_from_filename("mainnet-1000.json.zst").unwrap(), 1000);
        assert_eq!(block_number_from_filename("a-b-c-7.json.zst").unwrap(), 7);
        assert!(block_number_from_filename("mainnet-1000.json").is_err());
        assert!(block_number_from_filename("mainnet1000.json.zst").is_err());
        assert!(block_number_from_filename("mainnet-.json.zst").is_err());
        assert!(block_number_from_filename("mainnet-+5.json.zst").is_err());
        assert!(block_number_from_filename("m-99999999999999999999999.json.zst").is_err());
    }

    #[test]
    fn parse_entry_requires_exactly_two_tokens() {
        let ok = ChecksumIndex::parse_entry(&line('a', "mainnet-5.json.zst")).unwrap();
        assert_eq!(ok.block_number, 5);
        assert_eq!(ok.filename, "mainnet-5.json.zst");

        let err = ChecksumIndex::parse_entry("abc mainnet-5.json.zst").unwrap_err();
        assert!(CacheError::is_index_corruption(&err));
        let err = ChecksumIndex::parse_entry("abc  def  mainnet-5.json.zst").unwrap_err();
        assert!(CacheError::is_index_corruption(&err));
    }

    #[test]
    fn sort_is_stable_and_all_or_nothing() {
        let mut lines = vec![
            line('a', "n-5.json.zst"),
            line('b', "x-2.json.zst"),
            line('c', "n-9.json.zst"),
            line('d', "y-2.json.zst"),
        ];
        ChecksumIndex::sort(&mut lines).unwrap();
        let files: Vec<_> = lines.iter().map(|l| line_filename(l).unwrap()).collect();
        assert_eq!(files, vec!["x-2.json.zst", "y-2.json.zst", "n-5.json.zst", "n-9.json.zst"]);

        let mut bad = vec![line('a', "n-5.json.zst"), "broken".to_string(), line('c', "n-1.json.zst")];
        let before = bad.clone();
        assert!(ChecksumIndex::sort(&mut bad).is_err());
        assert_eq!(bad, before);
    }

    #[test]
    fn upsert_replaces_in_place_or_appends() {
        let mut lines = vec![line('a', "n-1.json.zst"), line('b', "n-3.json.zst")];
        let e = ChecksumEntry::new("f".repeat(96), "n-1.json.zst").unwrap();
        ChecksumIndex::upsert(&mut lines, &e);
        assert_eq!(lines[0], e.to_line());
        assert_eq!(lines.len(), 2);

        let e2 = ChecksumEntry::new("e".repeat(96), "n-2.json.zst").unwrap();
        ChecksumIndex::upsert(&mut lines, &e2);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], e2.to_line());
    }

    #[test]
    fn upsert_does_not_match_filename_suffixes_of_other_files() {
        // "mainnet-5.json.zst" оканчивается на "net-5.json.zst" - это разные файлы
        let mut lines = vec![line('a', "mainnet-5.json.zst")];
        let e = ChecksumEntry::new("b".repeat(96), "net-5.json.zst").unwrap();
        ChecksumIndex::upsert(&mut lines, &e);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn node_tree_filenames() {
        let addr = format!("0x{}", "ab".repeat(20));
        let name = format!("node-tree-1200-{}-7.json.zst", addr);
        assert_eq!(node_tree_key_from_filename(&name).unwrap(), (1200, 7));
        assert_eq!(
            FilenameScheme::NodeTree.key_of(&name).unwrap(),
            (1200, Some(7))
        );
        assert!(node_tree_key_from_filename("node-tree-1200-0xabc-7.json.zst").is_err());
        assert!(node_tree_key_from_filename("mainnet-1200.json.zst").is_err());
        assert!(node_tree_key_from_filename(&format!("node-tree-99999999999-{}-1.json.zst", addr)).is_err());
    }

    #[test]
    fn node_tree_sort_orders_by_block_then_index() {
        let addr = format!("0x{}", "01".repeat(20));
        let f = |b: u32, i: u64| line('a', &format!("node-tree-{}-{}-{}.json.zst", b, addr, i));
        let mut lines = vec![f(5, 2), f(3, 9), f(5, 0), f(3, 1)];
        ChecksumIndex::sort_with(&mut lines, FilenameScheme::NodeTree).unwrap();
        assert_eq!(lines, vec![f(3, 1), f(3, 9), f(5, 0), f(5, 2)]);
        // схема блоков видит здесь индекс узла вместо блока
        let e = ChecksumIndex::parse_entry(&f(5, 2)).unwrap();
        assert_eq!(e.block_number, 2);
    }
}
