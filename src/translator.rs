use anyhow::{Result, anyhow};
use image::RgbaImage;
use tracing::{debug, info};

use crate::ocr::OcrEngine;
use crate::overlay::{Compositor, EditHistory, PipelineError, Region, RunOutcome};
use crate::providers::{LanguageItem, TranslationProvider};

/// Target languages offered to the user. The first entry starts selected.
#[derive(Debug, Clone, Default)]
pub struct LanguageMenu {
    items: Vec<LanguageItem>,
    selected: Option<usize>,
}

impl LanguageMenu {
    pub fn new(items: Vec<LanguageItem>) -> Self {
        let selected = (!items.is_empty()).then_some(0);
        Self { items, selected }
    }

    pub async fn load<P: TranslationProvider + ?Sized>(provider: &P) -> Result<Self> {
        let response = provider.list_languages().await?;
        if !response.success {
            return Err(anyhow!(
                "failed to load languages: {}",
                response.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        let items = response.languages.unwrap_or_default();
        debug!(count = items.len(), "languages loaded");
        Ok(Self::new(items))
    }

    pub fn items(&self) -> &[LanguageItem] {
        &self.items
    }

    pub fn selected(&self) -> Option<&LanguageItem> {
        self.selected.and_then(|idx| self.items.get(idx))
    }

    /// Selects by `code` or channel language code, case-insensitively.
    pub fn select(&mut self, code: &str) -> Result<&LanguageItem> {
        let code = code.trim();
        let idx = self
            .items
            .iter()
            .position(|item| {
                item.code.eq_ignore_ascii_case(code) || item.target_code().eq_ignore_ascii_case(code)
            })
            .ok_or_else(|| {
                anyhow!(
                    "unknown language '{}' (available: {})",
                    code,
                    self.items
                        .iter()
                        .map(|item| item.code.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })?;
        self.selected = Some(idx);
        Ok(&self.items[idx])
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// One line per language, default first, as `code<TAB>local<TAB>english`.
    pub fn render(&self) -> String {
        self.items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let marker = if Some(idx) == self.selected { "*" } else { " " };
                format!(
                    "{} {}\t{}\t{}",
                    marker, item.code, item.display_name_local, item.display_name_english
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The translate action: a compositor plus the language chosen for it.
pub struct Translator<E: OcrEngine, P: TranslationProvider, H: EditHistory> {
    compositor: Compositor<E, P, H>,
    menu: LanguageMenu,
}

impl<E, P, H> Translator<E, P, H>
where
    E: OcrEngine,
    P: TranslationProvider,
    H: EditHistory,
{
    /// Loads the language list once from the compositor's provider.
    pub async fn initialize(compositor: Compositor<E, P, H>) -> Result<Self> {
        let menu = LanguageMenu::load(compositor.translator()).await?;
        if let Some(item) = menu.selected() {
            info!(language = %item.code, "default target language");
        }
        Ok(Self { compositor, menu })
    }

    pub fn with_menu(compositor: Compositor<E, P, H>, menu: LanguageMenu) -> Self {
        Self { compositor, menu }
    }

    pub fn menu(&self) -> &LanguageMenu {
        &self.menu
    }

    pub fn menu_mut(&mut self) -> &mut LanguageMenu {
        &mut self.menu
    }

    pub fn compositor(&self) -> &Compositor<E, P, H> {
        &self.compositor
    }

    pub async fn translate(
        &self,
        source: &RgbaImage,
        region: &Region,
    ) -> Result<RunOutcome, PipelineError> {
        self.compositor
            .translate_region(source, region, self.menu.selected())
            .await
    }
}
