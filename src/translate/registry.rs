//! Operator → translator map.
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};

use crate::operator::{Catalog, Operator};

use super::terminal;
use super::{DefaultTranslator, Translator};

static REGISTRY: OnceLock<Arc<TranslatorRegistry>> = OnceLock::new();

/// One translator per async operator, shared read-only by every request.
#[derive(Debug, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<Operator, Arc<dyn Translator>>,
}

impl TranslatorRegistry {
    /// The process-wide registry with the default translators, built once.
    pub fn global() -> Arc<TranslatorRegistry> {
        REGISTRY
            .get_or_init(|| Arc::new(TranslatorRegistry::with_defaults()))
            .clone()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Specialized translators for the terminal families and a structural
    /// translator for every chainable operator that has a native twin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        let mut missing = Vec::new();
        for operator in Catalog::global().operators().filter(|op| op.is_async()) {
            let translator = if operator.is_terminal() {
                terminal::for_family(operator.family)
            } else if DefaultTranslator::is_applicable(operator) {
                Some(Arc::new(DefaultTranslator::new(*operator)) as Arc<dyn Translator>)
            } else {
                None
            };
            match translator {
                Some(translator) => {
                    debug!(operator = %operator, translator = translator.name(), "registered");
                    registry.register(*operator, translator);
                }
                None => missing.push(operator.to_string()),
            }
        }
        info!(
            registered = registry.len(),
            untranslated = ?missing,
            "translator registry built"
        );
        registry
    }

    /// Adds or replaces the translator for `operator`.
    pub fn register(&mut self, operator: Operator, translator: Arc<dyn Translator>) {
        self.translators.insert(operator, translator);
    }

    /// Removes the translator for `operator`, returning it.
    pub fn unregister(&mut self, operator: &Operator) -> Option<Arc<dyn Translator>> {
        self.translators.remove(operator)
    }

    pub fn get(&self, operator: &Operator) -> Option<Arc<dyn Translator>> {
        self.translators.get(operator).cloned()
    }

    pub fn contains(&self, operator: &Operator) -> bool {
        self.translators.contains_key(operator)
    }

    pub fn len(&self) -> usize {
        self.translators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.translators.is_empty()
    }
}
