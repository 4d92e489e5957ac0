//! Row binding: pairing a scoped plan with one input row.

use crate::{Error, value::Row};

use super::scoping::{ScopedTable, ScopedTree, ScopedUploadable};

/// A scoped plan bound to a single row. Lives for that row only and is
/// consumed to produce one upload result.
#[derive(Clone, Copy)]
pub struct BoundPlan<'a> {
    pub plan: &'a ScopedUploadable,
    pub row: &'a Row,
}

impl ScopedUploadable {
    /// Bind a row, checking that every mapped caption is present.
    pub fn bind<'a>(&'a self, row: &'a Row) -> Result<BoundPlan<'a>, Error> {
        let mut captions = Vec::new();
        self.collect_captions(&mut captions);
        for caption in captions {
            if !row.contains_key(caption) {
                return Err(Error::MissingColumn(caption.to_owned()));
            }
        }
        Ok(BoundPlan { plan: self, row })
    }

    fn collect_captions<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Table(table) => table.collect_captions(out),
            Self::Tree(tree) => tree.collect_captions(out),
        }
    }
}

impl ScopedTable {
    fn collect_captions<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.extend(self.wbcols.values().map(|options| options.column.as_str()));
        for child in self.to_one.values() {
            child.uploadable.collect_captions(out);
        }
        for child in self.one_to_one.values() {
            child.table.collect_captions(out);
        }
        for collection in self.to_many.values() {
            for record in &collection.records {
                record.collect_captions(out);
            }
        }
    }
}

impl ScopedTree {
    fn collect_captions<'a>(&'a self, out: &mut Vec<&'a str>) {
        for item in &self.items {
            if let Some(columns) = &item.columns {
                out.extend(columns.values().map(|options| options.column.as_str()));
            }
        }
    }
}
