//! Cursor over variable objects: builds, reads and rewrites the per-row
//! header of `(field id, size info)` entries and streams field bytes
//! through the linked object.

use crate::codec::{self, EncodedField, SizeInfo};
use crate::errors::{RecordError, Result};
use crate::metadata::MetaData;
use crate::object_id::ObjectId;
use crate::row::RowData;
use crate::targets::TargetFields;
use crate::variable::free_area::FreeAreaManager;
use crate::variable::linked_object::{AccessMode, LinkedObject};
use crate::verify::{CancelFlag, Finding};
use pagestore::area::AreaFile;
use pagestore::{AreaId, PageId};
use std::collections::HashSet;
use std::sync::Arc;

/// The in-memory form of a variable object's header. On disk only the
/// size infos are stored, packed in field order; the field ids are
/// implied by the row's null bitmap.
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectHeader {
    pub entries: Vec<(usize, SizeInfo)>,
}

impl ObjectHeader {
    fn clear(&mut self) {
        self.entries.clear();
    }

    /// Total serialized header bytes.
    pub fn header_total(&self, meta: &MetaData) -> usize {
        self.entries
            .iter()
            .map(|(field_id, _)| meta.variable_header_size(*field_id))
            .sum()
    }

    /// Total stored payload bytes after the header.
    pub fn stored_total(&self, meta: &MetaData) -> usize {
        self.entries
            .iter()
            .map(|(field_id, info)| info.stored_size(meta.column(*field_id)))
            .sum()
    }

    /// Stream offset of a field's stored bytes.
    pub fn offset_of(&self, meta: &MetaData, field_id: usize) -> Option<usize> {
        let mut offset = self.header_total(meta);
        for (entry_field, info) in &self.entries {
            if *entry_field == field_id {
                return Some(offset);
            }
            offset += info.stored_size(meta.column(*entry_field));
        }
        None
    }

    pub fn info_for(&self, field_id: usize) -> Option<SizeInfo> {
        self.entries
            .iter()
            .find(|(entry_field, _)| *entry_field == field_id)
            .map(|(_, info)| *info)
    }
}

/// Iterator over the variable file.
#[derive(Debug)]
pub struct VariableIterator {
    area: Arc<AreaFile>,
    meta: Arc<MetaData>,
    linked: LinkedObject,
    header: ObjectHeader,
}

impl VariableIterator {
    pub(crate) fn new(area: Arc<AreaFile>, meta: Arc<MetaData>, mode: AccessMode) -> Self {
        Self {
            linked: LinkedObject::new(Arc::clone(&area), mode),
            area,
            meta,
            header: ObjectHeader::default(),
        }
    }

    /// Stores the row's non-null variable fields as one linked object and
    /// returns its head id; `UNDEFINED` when every variable field is null.
    pub(crate) fn insert(
        &mut self,
        row: &RowData,
        targets: Option<&TargetFields>,
        free_head: &mut ObjectId,
        free: &mut FreeAreaManager,
    ) -> Result<ObjectId> {
        let all_variable;
        let targets = match targets {
            Some(targets) => targets,
            None => {
                all_variable = self.meta.variable_fields().clone();
                &all_variable
            }
        };

        let mut encoded: Vec<(usize, EncodedField)> = Vec::with_capacity(targets.len());
        for field_id in targets.iter() {
            if row.is_null(field_id) {
                continue;
            }
            let value = row.value_for_field(field_id).ok_or_else(|| {
                RecordError::Unexpected(format!("no value supplied for column {field_id}"))
            })?;
            encoded.push((
                field_id,
                codec::encode_variable(self.meta.column(field_id), value)?,
            ));
        }
        if encoded.is_empty() {
            return Ok(ObjectId::UNDEFINED);
        }

        let total: usize = encoded
            .iter()
            .map(|(field_id, field)| {
                self.meta.variable_header_size(*field_id) + field.bytes.len()
            })
            .sum();

        let head = LinkedObject::create(&self.area, free, total, free_head)?;
        self.linked.attach(head)?;
        let result = (|| -> Result<()> {
            let mut buf = [0u8; 8];
            for (_, field) in &encoded {
                let written = field.info.write_to(&mut buf, 0)?;
                self.linked.write(&buf[..written])?;
            }
            for (_, field) in &encoded {
                self.linked.write(&field.bytes)?;
            }
            Ok(())
        })();
        self.linked.detach();
        result?;

        self.header.entries = encoded
            .iter()
            .map(|(field_id, field)| (*field_id, field.info))
            .collect();
        Ok(head)
    }

    /// Reads the targeted variable fields of the row into `row`.
    pub fn read(&mut self, row: &mut RowData, targets: &TargetFields) -> Result<()> {
        let head = row.variable_id();
        debug_assert!(!head.is_undefined());
        self.linked.attach(head)?;
        let result = self.read_attached(row, targets);
        self.linked.detach();
        result
    }

    fn read_attached(&mut self, row: &mut RowData, targets: &TargetFields) -> Result<()> {
        self.read_header(row)?;
        for field_id in targets.iter() {
            if row.is_null(field_id) {
                continue;
            }
            let Some(index) = row.targets().index_of(field_id) else {
                return Err(RecordError::Unexpected(format!(
                    "column {field_id} is not addressed by the row"
                )));
            };
            let info = self.header.info_for(field_id).ok_or_else(|| {
                RecordError::Unexpected(format!(
                    "variable object lacks an entry for column {field_id}"
                ))
            })?;
            let offset = self
                .header
                .offset_of(&self.meta, field_id)
                .expect("entry located above");
            self.linked.seek(offset)?;
            let stored = info.stored_size(self.meta.column(field_id));
            let mut bytes = vec![0u8; stored];
            self.linked.read(&mut bytes)?;
            let value = codec::decode_variable(self.meta.column(field_id), &info, &bytes)?;
            row.set_value_at(index, value);
        }
        Ok(())
    }

    /// Rewrites the row's variable side as delete-and-reinsert: targeted
    /// fields take their new values, untouched non-null fields are carried
    /// over from the old object. Returns the new head id.
    ///
    /// The old object is not deleted here; the caller expunges it once the
    /// new head is safely referenced.
    pub(crate) fn update(
        &mut self,
        old_header: &RowData,
        new_row: &RowData,
        targets: &TargetFields,
        free_head: &mut ObjectId,
        free: &mut FreeAreaManager,
    ) -> Result<ObjectId> {
        let all = self.meta.variable_fields().clone();
        let old_id = old_header.variable_id();
        if old_id.is_undefined() || targets.len() >= all.len() {
            return self.insert(new_row, Some(targets), free_head, free);
        }

        // Carry over the untouched, still non-null fields. The new row's
        // bitmap already merges old and new nullness.
        let carried: TargetFields = TargetFields::new(
            all.iter()
                .filter(|field_id| !targets.contains(*field_id) && !new_row.is_null(*field_id))
                .collect(),
        );
        let mut old_values = RowData::with_targets(Arc::clone(&self.meta), carried.clone());
        old_values.set_null_bits(old_header.null_bits().clone());
        old_values.set_variable_id(old_id);
        if !carried.is_empty() {
            self.read(&mut old_values, &carried)?;
        }

        let mut merged = RowData::with_targets(Arc::clone(&self.meta), all.clone());
        merged.set_null_bits(new_row.null_bits().clone());
        let pairs: Vec<(usize, usize)> = all.enumerate().collect();
        for (index, field_id) in pairs {
            if merged.is_null(field_id) {
                continue;
            }
            let value = if targets.contains(field_id) {
                new_row.value_for_field(field_id)
            } else {
                old_values.value_for_field(field_id)
            };
            let value = value.ok_or_else(|| {
                RecordError::Unexpected(format!("no value available for column {field_id}"))
            })?;
            merged.set_value_at(index, value.clone());
        }
        self.insert(&merged, Some(&all), free_head, free)
    }

    /// Threads the whole chain of `head` onto the free-variable chain.
    pub fn expunge(&mut self, head: ObjectId, free_head: &mut ObjectId) -> Result<()> {
        if head.is_undefined() {
            return Ok(());
        }
        LinkedObject::delete_all(&self.area, head, free_head)
    }

    /// Checks that the per-field sizes add up to the chain's payload
    /// bytes, and records the chain's areas for the page-store
    /// cross-check.
    pub fn verify_contents(
        &mut self,
        row: &RowData,
        findings: &mut Vec<Finding>,
        cancel: &CancelFlag,
        used: &mut HashSet<(PageId, AreaId)>,
    ) -> Result<()> {
        let head = row.variable_id();
        let chain = match LinkedObject::chain_areas(&self.area, head, cancel) {
            Ok(chain) => chain,
            Err(RecordError::Cancelled) => return Err(RecordError::Cancelled),
            Err(_) => {
                findings.push(Finding::CorruptVariableObject(head));
                return Ok(());
            }
        };
        let actual: usize = chain.iter().map(|(_, payload)| payload).sum();
        for (id, _) in &chain {
            used.insert((id.page_id(), id.area_id()));
        }

        self.linked.attach(head)?;
        let header_read = self.read_header(row);
        self.linked.detach();
        if header_read.is_err() {
            findings.push(Finding::CorruptVariableObject(head));
            return Ok(());
        }
        let expected = self.header.header_total(&self.meta) + self.header.stored_total(&self.meta);
        if expected != actual {
            findings.push(Finding::InconsistentVariableSize {
                object_id: head,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Forgets page handles after a store-level detach/recover.
    pub fn release_pages(&mut self) {
        self.linked.release_page();
    }

    /// Reads size infos for every non-null variable field of the row.
    /// The linked object must be attached at position 0.
    fn read_header(&mut self, row: &RowData) -> Result<()> {
        self.header.clear();
        let fields: Vec<usize> = self.meta.variable_fields().iter().collect();
        let mut buf = [0u8; 8];
        for field_id in fields {
            if row.is_null(field_id) {
                continue;
            }
            let size = self.meta.variable_header_size(field_id);
            self.linked.read(&mut buf[..size])?;
            let info = SizeInfo::read_from(self.meta.column(field_id), &buf[..size], 0)?;
            self.header.entries.push((field_id, info));
        }
        Ok(())
    }
}
