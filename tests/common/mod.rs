use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use ticket_watch::surface::{
    ExtractionSurface, LinkFacts, SurfaceError, TicketCandidate, TicketSelectors,
};

pub const BACK_LABEL: &str = "Back to categories";
const OPTION_SELECTOR: &str = "div.vi-text";
const SETTLE_SELECTOR: &str = ".categories, div.ticket-type";

/// Scripted stand-in for a rendered checkout page: a category list at the
/// top, one ticket view per category, a back control. Activation by label
/// moves between views the way clicking does on the live widget.
pub struct ScriptedSite {
    categories: Vec<String>,
    tickets: HashMap<String, Vec<TicketCandidate>>,
    current: Mutex<Option<String>>,
    pub navigations: Mutex<Vec<String>>,
}

impl ScriptedSite {
    pub fn new(categories: &[&str]) -> Self {
        ScriptedSite {
            categories: categories.iter().map(|c| c.to_string()).collect(),
            tickets: HashMap::new(),
            current: Mutex::new(None),
            navigations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_tickets(mut self, category: &str, tickets: Vec<TicketCandidate>) -> Self {
        self.tickets.insert(category.to_string(), tickets);
        self
    }
}

/// Builds a ticket candidate the way the live widget presents one.
pub fn ticket(name: &str, price: &str, sold_out: bool) -> TicketCandidate {
    TicketCandidate {
        name: Some(name.to_string()),
        price: Some(price.to_string()),
        classes: if sold_out {
            vec!["ticket-type".to_string(), "sold-out".to_string()]
        } else {
            vec!["ticket-type".to_string()]
        },
        add_control: None,
    }
}

#[async_trait]
impl ExtractionSurface for ScriptedSite {
    async fn find_visible(&self, selector: &str) -> Result<Vec<String>, SurfaceError> {
        let current = self.current.lock().unwrap().clone();
        match selector {
            OPTION_SELECTOR => Ok(if current.is_none() {
                self.categories.clone()
            } else {
                Vec::new()
            }),
            SETTLE_SELECTOR => Ok(vec!["widget".to_string()]),
            "button" => Ok(current
                .is_some()
                .then(|| BACK_LABEL.to_string())
                .into_iter()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn find_links(&self, _selector: &str) -> Result<Vec<LinkFacts>, SurfaceError> {
        Ok(Vec::new())
    }

    async fn find_tickets(
        &self,
        _selectors: &TicketSelectors,
    ) -> Result<Vec<TicketCandidate>, SurfaceError> {
        let current = self.current.lock().unwrap().clone();
        Ok(current
            .and_then(|category| self.tickets.get(&category).cloned())
            .unwrap_or_default())
    }

    async fn activate(&self, selector: &str, label: &str) -> Result<(), SurfaceError> {
        let mut current = self.current.lock().unwrap();
        if label == BACK_LABEL && current.is_some() {
            *current = None;
            return Ok(());
        }
        if current.is_none() {
            if let Some(category) = self.categories.iter().find(|c| c.as_str() == label) {
                *current = Some(category.clone());
                return Ok(());
            }
        }
        Err(SurfaceError::ElementNotFound {
            selector: selector.to_string(),
            label: label.to_string(),
        })
    }

    async fn current_location(&self) -> Result<String, SurfaceError> {
        Ok(self
            .navigations
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default())
    }

    async fn navigate_to(&self, url: &str) -> Result<(), SurfaceError> {
        self.navigations.lock().unwrap().push(url.to_string());
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    async fn enter_frame(&self, _selector: &str) -> Result<bool, SurfaceError> {
        Ok(false)
    }

    async fn exit_frame(&self) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn page_source(&self) -> Result<String, SurfaceError> {
        Ok(String::new())
    }
}
