//! Conversion of OBO documents into [`TermRecord`]s using `fastobo`.

use std::path::Path;

use super::TermRecord;

/// Convert ident to String.
fn ident_to_string(ident: &fastobo::ast::Ident) -> String {
    match ident {
        fastobo::ast::Ident::Prefixed(val) => format!("{}:{}", val.prefix(), val.local()),
        fastobo::ast::Ident::Unprefixed(val) => val.as_str().to_string(),
        fastobo::ast::Ident::Url(val) => val.as_str().to_string(),
    }
}

/// Extract one record per term frame of `doc`; other frames are ignored.
pub fn records_from_doc(doc: &fastobo::ast::OboDoc) -> Vec<TermRecord> {
    doc.entities()
        .iter()
        .filter_map(fastobo::ast::EntityFrame::as_term)
        .map(|term_frame| {
            let mut record = TermRecord {
                id: ident_to_string(term_frame.id().as_inner().as_ref()),
                ..Default::default()
            };
            for clause in term_frame
                .clauses()
                .iter()
                .map(fastobo::ast::Line::as_inner)
            {
                match clause {
                    fastobo::ast::TermClause::IsA(parent) => {
                        let parent: &fastobo::ast::ClassIdent = parent;
                        record.parent_ids.push(ident_to_string(parent.as_ref()));
                    }
                    fastobo::ast::TermClause::AltId(alt_id) => {
                        record.alt_ids.push(ident_to_string(alt_id));
                    }
                    fastobo::ast::TermClause::IsObsolete(is_obsolete) => {
                        record.is_obsolete = *is_obsolete;
                    }
                    fastobo::ast::TermClause::ReplacedBy(replacement) => {
                        let replacement: &fastobo::ast::ClassIdent = replacement;
                        record.replaced_by = Some(ident_to_string(replacement.as_ref()));
                    }
                    _ => (),
                }
            }
            record
        })
        .collect()
}

/// The `data-version` header clause of `doc`, if any.
pub fn data_version(doc: &fastobo::ast::OboDoc) -> Option<String> {
    doc.header().iter().find_map(|clause| match clause {
        fastobo::ast::HeaderClause::DataVersion(version) => Some(version.as_str().to_string()),
        _ => None,
    })
}

/// Term records and header metadata of an OBO file.
#[derive(Debug, Clone, Default)]
pub struct OboTerms {
    /// Declared data version of the ontology.
    pub data_version: Option<String>,
    /// One record per term frame.
    pub records: Vec<TermRecord>,
}

/// Load term records from an OBO file, gzip-compressed if the name ends in `.gz`.
///
/// # Errors
///
/// In the case that the file cannot be read or parsed.
pub fn load_obo<P: AsRef<Path>>(path: P) -> Result<OboTerms, anyhow::Error> {
    let reader = crate::common::open_read_maybe_gz(path.as_ref())?;
    let doc = fastobo::from_reader(reader).map_err(|e| {
        anyhow::anyhow!("Error loading OBO from {}: {}", path.as_ref().display(), e)
    })?;
    let records = records_from_doc(&doc);
    tracing::debug!(
        "  read {} term frames from {}",
        records.len(),
        path.as_ref().display()
    );
    Ok(OboTerms {
        data_version: data_version(&doc),
        records,
    })
}

#[cfg(test)]
mod test {
    use crate::ontology::OntologyGraph;

    #[test]
    fn load_toy_obo() -> Result<(), anyhow::Error> {
        let super::OboTerms {
            data_version,
            records,
        } = super::load_obo("tests/data/toy.obo")?;

        assert_eq!(data_version.as_deref(), Some("hp/releases/2024-01-01"));
        assert_eq!(records.len(), 8);
        let b = records
            .iter()
            .find(|r| r.id == "HP:0000003")
            .expect("HP:0000003 must be present");
        assert_eq!(b.parent_ids, vec![String::from("HP:0000002")]);
        assert_eq!(b.alt_ids, vec![String::from("HP:0000010")]);
        let old = records
            .iter()
            .find(|r| r.id == "HP:0000020")
            .expect("HP:0000020 must be present");
        assert!(old.is_obsolete);
        assert_eq!(old.replaced_by.as_deref(), Some("HP:0000004"));

        let graph = OntologyGraph::from_records(&records)?;
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.resolve("HP:0000020")?, graph.resolve("HP:0000004")?);

        Ok(())
    }
}
