//! Polling configuration for content scripts.

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Interval between `checkAuthenticated` polls.
pub const DEFAULT_AUTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Give up waiting for authentication after this long.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Interval between element presence polls.
pub const DEFAULT_ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Give up waiting for an element after this long.
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ContentScriptOptions
// ============================================================================

/// Timing of the waiting primitives.
///
/// # Example
///
/// ```ignore
/// let options = ContentScriptOptions::new()
///     .with_element_timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentScriptOptions {
    /// Interval between `checkAuthenticated` polls.
    pub auth_poll_interval: Duration,
    /// Timeout of `waitForAuthenticated`.
    pub auth_timeout: Duration,
    /// Interval between element presence polls.
    pub element_poll_interval: Duration,
    /// Timeout of `waitForElementNoReload`.
    pub element_timeout: Duration,
}

impl Default for ContentScriptOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentScriptOptions {
    /// Creates options with default timings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            auth_poll_interval: DEFAULT_AUTH_POLL_INTERVAL,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            element_poll_interval: DEFAULT_ELEMENT_POLL_INTERVAL,
            element_timeout: DEFAULT_ELEMENT_TIMEOUT,
        }
    }

    /// Sets the authentication poll interval.
    #[inline]
    #[must_use]
    pub const fn with_auth_poll_interval(mut self, interval: Duration) -> Self {
        self.auth_poll_interval = interval;
        self
    }

    /// Sets the authentication timeout.
    #[inline]
    #[must_use]
    pub const fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    /// Sets the element poll interval.
    #[inline]
    #[must_use]
    pub const fn with_element_poll_interval(mut self, interval: Duration) -> Self {
        self.element_poll_interval = interval;
        self
    }

    /// Sets the element timeout.
    #[inline]
    #[must_use]
    pub const fn with_element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ContentScriptOptions::default();
        assert_eq!(options.auth_poll_interval, Duration::from_secs(1));
        assert_eq!(options.auth_timeout, Duration::from_secs(300));
        assert_eq!(options.element_poll_interval, Duration::from_millis(100));
        assert_eq!(options.element_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_builder_chain() {
        let options = ContentScriptOptions::new()
            .with_auth_timeout(Duration::from_secs(2))
            .with_element_poll_interval(Duration::from_millis(5));

        assert_eq!(options.auth_timeout, Duration::from_secs(2));
        assert_eq!(options.element_poll_interval, Duration::from_millis(5));
        assert_eq!(options.element_timeout, DEFAULT_ELEMENT_TIMEOUT);
    }
}
