// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for ctxgrep.
//!
//! Most failures degrade in place (provider chains, parser fallbacks) and
//! never reach the caller; the types here are the ones that do surface,
//! with remediation in the message.

/// A provider was selected but its credential is missing from the
/// environment.
#[derive(Debug, thiserror::Error)]
#[error("{provider} provider selected but {var} is not set; export {var} or let the chain fall through to the local provider")]
pub struct MissingCredentialError {
    pub provider: &'static str,
    pub var: &'static str,
}

/// No workspace root could be resolved from any source.
#[derive(Debug, thiserror::Error)]
#[error("cannot resolve a workspace root: pass --path, set CTXGREP_ROOT, or run from inside a workspace")]
pub struct RootResolutionError;
