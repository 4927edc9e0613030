/**
 * STATUS MODEL - Statuts d'une VM et politiques associées
 *
 * RÔLE :
 * Fonctions pures sur un statut : criticité, transitions attendues,
 * intervalle de polling adaptatif et délai avant "statut bloqué".
 *
 * FONCTIONNEMENT :
 * - Critique (Stopped/Crashed/Error) = remédiation + polling rapide
 * - Transitoire (Starting/Stopping/...) = on attend, polling espacé
 * - Running/Deleting = régime stable, polling au max
 * - La table de transitions ne bloque jamais : l'API distante fait foi,
 *   une transition inattendue est seulement signalée dans les logs
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VmStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Starting,
    Stopping,
    Crashed,
    Error,
    Provisioning,
    Restarting,
    Updating,
    Deleting,
}

impl VmStatus {
    pub const ALL: [VmStatus; 11] = [
        VmStatus::Unknown,
        VmStatus::Running,
        VmStatus::Stopped,
        VmStatus::Starting,
        VmStatus::Stopping,
        VmStatus::Crashed,
        VmStatus::Error,
        VmStatus::Provisioning,
        VmStatus::Restarting,
        VmStatus::Updating,
        VmStatus::Deleting,
    ];

    /// Normalise un statut tel que renvoyé par l'API cloud ("RUNNING", "STOPPED"...).
    /// Toute valeur inconnue devient `Unknown`.
    pub fn from_api(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "RUNNING" => VmStatus::Running,
            "STOPPED" => VmStatus::Stopped,
            "STARTING" => VmStatus::Starting,
            "STOPPING" => VmStatus::Stopping,
            "CRASHED" => VmStatus::Crashed,
            "ERROR" => VmStatus::Error,
            "PROVISIONING" => VmStatus::Provisioning,
            "RESTARTING" => VmStatus::Restarting,
            "UPDATING" => VmStatus::Updating,
            "DELETING" => VmStatus::Deleting,
            _ => VmStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VmStatus::Unknown => "Unknown",
            VmStatus::Running => "Running",
            VmStatus::Stopped => "Stopped",
            VmStatus::Starting => "Starting",
            VmStatus::Stopping => "Stopping",
            VmStatus::Crashed => "Crashed",
            VmStatus::Error => "Error",
            VmStatus::Provisioning => "Provisioning",
            VmStatus::Restarting => "Restarting",
            VmStatus::Updating => "Updating",
            VmStatus::Deleting => "Deleting",
        }
    }

    /// Statuts qui exigent une action immédiate.
    pub fn is_critical(&self) -> bool {
        matches!(self, VmStatus::Stopped | VmStatus::Crashed | VmStatus::Error)
    }

    /// Statuts censés se résoudre tout seuls.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            VmStatus::Starting
                | VmStatus::Stopping
                | VmStatus::Provisioning
                | VmStatus::Restarting
                | VmStatus::Updating
        )
    }

    pub fn should_remediate(&self) -> bool {
        self.is_critical()
    }

    /// Délai avant le prochain check.
    ///
    /// Les multiples de `min` sont plafonnés à `max` ; `min <= max` est
    /// garanti par la config.
    pub fn check_interval(&self, min: Duration, max: Duration) -> Duration {
        let factor = match self {
            VmStatus::Stopped | VmStatus::Crashed => 1,
            VmStatus::Error => 2,
            VmStatus::Starting | VmStatus::Restarting | VmStatus::Stopping => 2,
            VmStatus::Provisioning => 3,
            VmStatus::Updating => 6,
            VmStatus::Running | VmStatus::Deleting => return max,
            VmStatus::Unknown => return min / 2 + max / 2,
        };
        min.saturating_mul(factor).min(max)
    }

    /// Durée au-delà de laquelle un statut transitoire est considéré bloqué.
    /// `Duration::ZERO` = pas de timeout.
    pub fn stuck_timeout(&self) -> Duration {
        match self {
            VmStatus::Starting | VmStatus::Restarting | VmStatus::Provisioning => {
                Duration::from_secs(5 * 60)
            }
            VmStatus::Stopping => Duration::from_secs(3 * 60),
            VmStatus::Updating => Duration::from_secs(10 * 60),
            _ => Duration::ZERO,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transitions attendues depuis chaque statut.
fn allowed_from(from: VmStatus) -> &'static [VmStatus] {
    use VmStatus::*;
    match from {
        Stopped => &[Starting, Provisioning, Deleting],
        Starting => &[Running, Error, Stopped],
        Running => &[Stopping, Restarting, Updating, Crashed, Error, Stopped],
        Stopping => &[Stopped, Error],
        Restarting => &[Running, Error, Stopped],
        Updating => &[Running, Error],
        Provisioning => &[Stopped, Starting, Running, Error],
        Crashed => &[Starting, Provisioning, Stopped],
        Error => &[Stopped, Starting, Provisioning, Deleting],
        Deleting => &[],
        Unknown => &[],
    }
}

/// `Unknown -> *` et `x -> x` sont toujours valides, le reste suit la table.
pub fn is_valid_transition(from: VmStatus, to: VmStatus) -> bool {
    if from == VmStatus::Unknown || from == to {
        return true;
    }
    allowed_from(from).contains(&to)
}
