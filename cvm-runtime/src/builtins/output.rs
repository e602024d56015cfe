//! Output builtin
//!
//! An append-only segment with no rules. The program output can be split into
//! pages for separate commitment; cells outside every page belong to page 0.

use super::{BuiltinCore, BuiltinRunner};
use crate::error::{Result, RuntimeError, SecurityError};
use crate::memory::Memory;
use crate::segments::MemorySegmentManager;
use cvm_spec::Relocatable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::collections::BTreeMap;
use tracing::debug;

const NAME: &str = "output";

/// A sub-range of the output segment, as an offset from its base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicMemoryPage {
    pub start: usize,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct OutputBuiltin {
    core: BuiltinCore,
    pages: BTreeMap<usize, PublicMemoryPage>,
    attributes: BTreeMap<String, Value>,
}

impl OutputBuiltin {
    pub fn new(included: bool) -> Self {
        Self {
            core: BuiltinCore::new(NAME, included, None, 1, 1),
            pages: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Tag `[page_start, page_start + page_size)` as page `page_id`. Page 0 is the default page.
    pub fn add_page(
        &mut self,
        page_id: usize,
        page_start: Relocatable,
        page_size: usize,
    ) -> Result<()> {
        let builtin_err = |reason: String| RuntimeError::Builtin { builtin: NAME, reason };
        if page_id == 0 {
            return Err(builtin_err("Page id 0 is reserved for the default page".to_string()));
        }
        if page_start.segment_index != self.core.base.segment_index {
            return Err(builtin_err(format!(
                "Page start {page_start} must be inside the output segment"
            )));
        }
        if self.pages.contains_key(&page_id) {
            return Err(builtin_err(format!("Page {page_id} was already added")));
        }
        let start: usize = page_start
            .sub_rel(&self.core.base)?
            .try_into()
            .map_err(|_| {
                builtin_err(format!("Page start {page_start} is before the output segment"))
            })?;
        debug!(page_id, start, size = page_size, "output page");
        self.pages.insert(page_id, PublicMemoryPage { start, size: page_size });
        Ok(())
    }

    pub fn pages(&self) -> &BTreeMap<usize, PublicMemoryPage> {
        &self.pages
    }

    /// Free-form metadata carried in the additional data
    pub fn add_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// `(offset, page_id)` for every used cell. Pages may not overlap or run past the used cells.
    pub fn get_public_memory(
        &self,
        segments: &MemorySegmentManager,
    ) -> Result<Vec<(usize, usize)>> {
        let size = self.get_used_cells(segments);
        let mut public_memory: Vec<(usize, usize)> = (0..size).map(|offset| (offset, 0)).collect();
        for (page_id, page) in &self.pages {
            for offset in page.start..page.start + page.size {
                match public_memory.get_mut(offset) {
                    Some(entry) if entry.1 == 0 => entry.1 = *page_id,
                    Some(_) => {
                        return Err(RuntimeError::Builtin {
                            builtin: NAME,
                            reason: format!("Offset {offset} was already assigned a page"),
                        })
                    }
                    None => {
                        return Err(RuntimeError::Builtin {
                            builtin: NAME,
                            reason: format!("Page {page_id} extends past the output size {size}"),
                        })
                    }
                }
            }
        }
        Ok(public_memory)
    }
}

impl BuiltinRunner for OutputBuiltin {
    fn core(&self) -> &BuiltinCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BuiltinCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn finalize_segments(&mut self, segments: &mut MemorySegmentManager) -> Result<()> {
        let public_memory = self.get_public_memory(segments)?;
        let size = self.get_used_cells(segments);
        segments.finalize(self.core.base.segment_index, Some(size), public_memory);
        Ok(())
    }

    fn get_additional_data(&self) -> Value {
        let pages: serde_json::Map<String, Value> = self
            .pages
            .iter()
            .map(|(id, page)| (id.to_string(), json!([page.start, page.size])))
            .collect();
        json!({ "pages": pages, "attributes": self.attributes })
    }

    fn extend_additional_data(&mut self, data: &Value, _trusted: bool) -> Result<()> {
        let malformed = || RuntimeError::Builtin {
            builtin: NAME,
            reason: format!("Malformed additional data: {data}"),
        };
        if let Some(pages) = data.get("pages").and_then(Value::as_object) {
            for (id, page) in pages {
                let page_id: usize = id.parse().map_err(|_| malformed())?;
                let (start, size): (usize, usize) = serde_json::from_value(page.clone())?;
                self.pages.insert(page_id, PublicMemoryPage { start, size });
            }
        }
        if let Some(attributes) = data.get("attributes") {
            let attributes = attributes.as_object().ok_or_else(malformed)?;
            self.attributes.extend(attributes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(())
    }

    fn run_security_checks(&self, _memory: &Memory) -> std::result::Result<(), SecurityError> {
        Ok(())
    }
}
