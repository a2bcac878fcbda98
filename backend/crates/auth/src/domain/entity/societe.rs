//! Société (tenant) and its sites

use chrono::{DateTime, Utc};
use kernel::id::{SiteId, SocieteId};

#[derive(Debug, Clone)]
pub struct Site {
    pub id: SiteId,
    pub societe_id: SocieteId,
    pub nom: String,
    pub code: String,
    pub is_principal: bool,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct Societe {
    pub id: SocieteId,
    pub nom: String,
    /// Short unique code, also carried in tenant tokens
    pub code: String,
    /// Name of the tenant database holding this société's business data
    pub database_name: String,
    pub is_active: bool,
    pub sites: Vec<Site>,
    pub created_at: DateTime<Utc>,
}

impl Societe {
    pub fn new(nom: impl Into<String>, code: impl Into<String>) -> Self {
        let code = code.into().to_ascii_uppercase();
        Self {
            id: SocieteId::new(),
            nom: nom.into(),
            database_name: format!("erp_topsteel_{}", code.to_ascii_lowercase()),
            code,
            is_active: true,
            sites: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn add_site(&mut self, nom: impl Into<String>, code: impl Into<String>) -> SiteId {
        let site = Site {
            id: SiteId::new(),
            societe_id: self.id,
            nom: nom.into(),
            code: code.into(),
            is_principal: self.sites.is_empty(),
            is_active: true,
        };
        let id = site.id;
        self.sites.push(site);
        id
    }

    pub fn site(&self, site_id: SiteId) -> Option<&Site> {
        self.sites.iter().find(|s| s.id == site_id)
    }

    pub fn active_sites(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter().filter(|s| s.is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_societe_derives_database_name() {
        let societe = Societe::new("Acier Ouest", "aco");
        assert_eq!(societe.code, "ACO");
        assert_eq!(societe.database_name, "erp_topsteel_aco");
    }

    #[test]
    fn test_first_site_is_principal() {
        let mut societe = Societe::new("Acier Ouest", "ACO");
        let nantes = societe.add_site("Nantes", "NTE");
        let rennes = societe.add_site("Rennes", "RNS");

        assert!(societe.site(nantes).unwrap().is_principal);
        assert!(!societe.site(rennes).unwrap().is_principal);
        assert!(societe.site(SiteId::new()).is_none());
    }
}
