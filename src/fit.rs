//! Flattened Image Tree (FIT) images.
//!
//! A FIT image is a device tree blob with two interesting nodes:
//! `/images`, holding one subnode per embedded binary (kernel, ramdisk,
//! device tree, ...) with its bytes in a `data` property, and
//! `/configurations`, holding named combinations of those images plus a
//! `default` property naming the configuration to use when none is asked for.
//!
//! Walking the device tree itself is left to the `fdt` crate.

#[cfg(test)]
pub(crate) mod tests;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use anyhow::{anyhow, bail, Context};
use fdt::node::{FdtNode, NodeProperty};
use fdt::Fdt;

const IMAGES_NODE: &str = "/images";
const CONFIGURATIONS_NODE: &str = "/configurations";
const CHOSEN_NODE: &str = "/chosen";

const FDT_HEADER_SIZE: usize = 40;
const FDT_RESERVE_ENTRY_SIZE: usize = 16;
const FDT_BEGIN_NODE: u32 = 1;
const FDT_END_NODE: u32 = 2;
const FDT_PROP: u32 = 3;
const FDT_NOP: u32 = 4;
const FDT_END: u32 = 9;

/// One binary embedded in a FIT image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitBlob {
    /// Name of the node under `/images`.
    pub name: String,
    /// Contents of the `type` property, e.g. "kernel" or "ramdisk".
    pub kind: Option<String>,
    pub arch: Option<String>,
    pub compression: Option<String>,
    pub load: Option<u64>,
    pub entry: Option<u64>,
    pub data: Vec<u8>,
}

impl FitBlob {
    /// True when the blob can be handed to the kernel as is.
    pub fn is_uncompressed(&self) -> bool {
        match self.compression.as_deref() {
            None | Some("none") => true,
            Some(_) => false,
        }
    }

    /// The `/chosen/bootargs` of a device tree blob, if it has any.
    pub fn bootargs(&self) -> anyhow::Result<Option<String>> {
        if !self.is_uncompressed() {
            bail!("device tree \"{}\" is compressed", self.name);
        }
        with_tree(&self.data, |tree| {
            Ok(tree.find_node(CHOSEN_NODE)
                .and_then(|chosen| string_property(chosen, "bootargs")))
        }).map_err(|err| anyhow!("image \"{}\": {}", self.name, err))
    }
}

/// A named configuration, with its image references already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitConfig {
    pub name: String,
    pub description: Option<String>,
    pub kernel: Option<Rc<FitBlob>>,
    pub ramdisk: Option<Rc<FitBlob>>,
    pub fdt: Option<Rc<FitBlob>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FitImage {
    pub description: Option<String>,
    /// Empty when the image does not name a default configuration.
    pub default_config: String,
    pub configs: BTreeMap<String, FitConfig>,
}

impl FitImage {
    pub fn config(&self, name: &str) -> Option<&FitConfig> {
        self.configs.get(name)
    }
}

/// Turns the raw bytes of a FIT image into a [`FitImage`].
pub trait FitParser {
    fn parse(&self, bytes: &[u8]) -> anyhow::Result<FitImage>;
}

/// The [`FitParser`] used on a real system.
#[derive(Debug, Default)]
pub struct FdtFitParser;

// The value of a string property, up to the first NUL.
// String list properties therefore yield their first entry.
fn string_property(node: FdtNode, name: &str) -> Option<String> {
    let property = node.property(name)?;
    let value = std::str::from_utf8(property.value).ok()?;
    let first = value.split('\0').next().unwrap_or_default();
    Some(first.to_string())
}

// Addresses are stored as one or two big endian 32 bit cells.
fn address_property(property: NodeProperty) -> anyhow::Result<u64> {
    match *property.value {
        [a, b, c, d] => Ok(u32::from_be_bytes([a, b, c, d]) as u64),
        [a, b, c, d, e, f, g, h] => Ok(u64::from_be_bytes([a, b, c, d, e, f, g, h])),
        _ => bail!(
            "property \"{}\" has invalid address length {}",
            property.name, property.value.len(),
        ),
    }
}

fn parse_blob(node: FdtNode) -> anyhow::Result<FitBlob> {
    let data = node.property("data")
        .ok_or_else(|| anyhow!("image \"{}\" has no embedded data", node.name))?;
    let load = node.property("load").map(address_property).transpose()
        .with_context(|| format!("invalid load address in image \"{}\"", node.name))?;
    let entry = node.property("entry").map(address_property).transpose()
        .with_context(|| format!("invalid entry address in image \"{}\"", node.name))?;

    Ok(FitBlob {
        name: node.name.to_string(),
        kind: string_property(node, "type"),
        arch: string_property(node, "arch"),
        compression: string_property(node, "compression"),
        load,
        entry,
        data: data.value.to_vec(),
    })
}

fn resolve_image(
    images: &BTreeMap<String, Rc<FitBlob>>,
    config: FdtNode,
    property: &str,
) -> anyhow::Result<Option<Rc<FitBlob>>> {
    let image_name = match string_property(config, property) {
        None => return Ok(None),
        Some(x) => x,
    };
    match images.get(&image_name) {
        Some(blob) => Ok(Some(blob.clone())),
        None => bail!(
            "configuration \"{}\" refers to missing {} image \"{}\"",
            config.name, property, image_name,
        ),
    }
}

fn be32(bytes: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let field: [u8; 4] = bytes.get(offset..end)?.try_into().ok()?;
    Some(u32::from_be_bytes(field))
}

fn align4(offset: usize) -> Option<usize> {
    offset.checked_add(3).map(|x| x & !3)
}

// The block `offset..offset + size` of the blob, if it lies inside `total`.
fn block(bytes: &[u8], total: usize, offset: u32, size: u32) -> anyhow::Result<&[u8]> {
    let start = offset as usize;
    let end = start.checked_add(size as usize)
        .filter(|&end| end <= total)
        .ok_or_else(|| anyhow!("block at {:#x} of size {:#x} exceeds the blob", offset, size))?;
    Ok(&bytes[start..end])
}

/// Checks every offset, size and token of a flattened device tree
/// against the blob's bounds. The `fdt` crate trusts them and indexes
/// out of bounds when they are corrupt.
fn check_tree(bytes: &[u8]) -> anyhow::Result<()> {
    let header = |offset: usize| be32(bytes, offset)
        .ok_or_else(|| anyhow!("blob too small for a device tree header"));
    let total = header(4)? as usize;
    if bytes.len() < FDT_HEADER_SIZE || total > bytes.len() {
        bail!("blob is {} bytes, header claims {}", bytes.len(), total);
    }
    let structs = block(bytes, total, header(8)?, header(36)?)?;
    let strings = block(bytes, total, header(12)?, header(32)?)?;
    block(bytes, total, header(16)?, FDT_RESERVE_ENTRY_SIZE as u32)?;

    let token_at = |pos: usize| be32(structs, pos)
        .ok_or_else(|| anyhow!("structure block ends at {:#x} without an end token", pos));
    let mut pos = 0;
    let mut depth = 0usize;
    let mut seen_root = false;
    loop {
        let token = token_at(pos)?;
        pos += 4;
        match token {
            FDT_BEGIN_NODE => {
                if depth == 0 && seen_root {
                    bail!("second root node at {:#x}", pos - 4);
                }
                seen_root = true;
                depth += 1;
                let name_len = structs.get(pos..)
                    .and_then(|rest| rest.iter().position(|&b| b == 0))
                    .ok_or_else(|| anyhow!("unterminated node name at {:#x}", pos))?;
                pos = align4(pos + name_len + 1).unwrap_or(usize::MAX);
            },
            FDT_END_NODE => {
                depth = depth.checked_sub(1)
                    .ok_or_else(|| anyhow!("unbalanced node end at {:#x}", pos - 4))?;
            },
            FDT_PROP => {
                if depth == 0 {
                    bail!("property outside of any node at {:#x}", pos - 4);
                }
                let len = token_at(pos)? as usize;
                let name_offset = token_at(pos + 4)? as usize;
                let name_ok = strings.get(name_offset..)
                    .map_or(false, |rest| rest.contains(&0));
                if !name_ok {
                    bail!("bad property name offset {:#x}", name_offset);
                }
                pos = (pos + 8).checked_add(len).and_then(align4).unwrap_or(usize::MAX);
            },
            FDT_NOP => {},
            FDT_END => {
                if depth != 0 || !seen_root {
                    bail!("structure block ends inside a node");
                }
                return Ok(());
            },
            other => bail!("unknown token {:#x} at {:#x}", other, pos - 4),
        }
        if pos > structs.len() {
            bail!("structure block overrun at {:#x}", pos);
        }
    }
}

/// Runs `walk` over the device tree in `bytes`, once it passed [`check_tree`].
/// Anything the check misses and `fdt` panics on comes back as an error.
fn with_tree<R>(
    bytes: &[u8],
    walk: impl FnOnce(&Fdt) -> anyhow::Result<R>,
) -> anyhow::Result<R> {
    check_tree(bytes).map_err(|err| anyhow!("invalid device tree: {}", err))?;
    panic::catch_unwind(AssertUnwindSafe(|| {
        let tree = Fdt::new(bytes)
            .map_err(|err| anyhow!("invalid device tree: {:?}", err))?;
        walk(&tree)
    })).unwrap_or_else(|_| Err(anyhow!("invalid device tree: malformed structure")))
}

impl FitParser for FdtFitParser {
    fn parse(&self, bytes: &[u8]) -> anyhow::Result<FitImage> {
        with_tree(bytes, walk_image)
    }
}

fn walk_image(tree: &Fdt) -> anyhow::Result<FitImage> {
    // Collect every embedded image first, configurations refer to them by name.
    let mut images = BTreeMap::new();
    if let Some(images_node) = tree.find_node(IMAGES_NODE) {
        for node in images_node.children() {
            let blob = parse_blob(node)?;
            images.insert(blob.name.clone(), Rc::new(blob));
        }
    }

    let mut default_config = String::new();
    let mut configs = BTreeMap::new();
    if let Some(configurations) = tree.find_node(CONFIGURATIONS_NODE) {
        default_config = string_property(configurations, "default").unwrap_or_default();
        for node in configurations.children() {
            let config = FitConfig {
                name: node.name.to_string(),
                description: string_property(node, "description"),
                kernel: resolve_image(&images, node, "kernel")?,
                ramdisk: resolve_image(&images, node, "ramdisk")?,
                fdt: resolve_image(&images, node, "fdt")?,
            };
            configs.insert(config.name.clone(), config);
        }
    }

    let description = tree.find_node("/")
        .and_then(|root| string_property(root, "description"));

    Ok(FitImage {
        description,
        default_config,
        configs,
    })
}
