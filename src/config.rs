use crate::Error;

/// What to do when a record of the current read epoch fails to decrypt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecryptFailurePolicy {
    /// Drop the record and carry on. Datagram transports see forged and
    /// corrupted records as ordinary noise.
    #[default]
    Discard,
    /// Return [`Error::DecryptFailed`] and let the caller tear down the
    /// connection.
    Fatal,
}

/// Reassembly configuration
#[derive(Debug, Clone)]
pub struct Config {
    max_handshake_message_size: usize,
    max_buffered_units: usize,
    decrypt_failure_policy: DecryptFailurePolicy,
    replay_protection: bool,
}

/// Largest value the 24 bit handshake length field can carry.
const MAX_LENGTH_FIELD: usize = 0x00ff_ffff;

const DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE: usize = 32_768;

// The default buffer holds the largest message cut into fragments of this
// size, plus room for the rest of its flight.
const SMALLEST_EXPECTED_FRAGMENT: usize = 128;
const FLIGHT_UNITS: usize = 32;

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            max_handshake_message_size: DEFAULT_MAX_HANDSHAKE_MESSAGE_SIZE,
            max_buffered_units: None,
            decrypt_failure_policy: DecryptFailurePolicy::Discard,
            replay_protection: true,
        }
    }

    /// Largest handshake message we are prepared to reassemble.
    ///
    /// A fragment declaring a longer message terminates the connection
    /// before any of it is buffered.
    #[inline(always)]
    pub fn max_handshake_message_size(&self) -> usize {
        self.max_handshake_message_size
    }

    /// Max number of fragments and records held while waiting for a flight
    /// to complete.
    #[inline(always)]
    pub fn max_buffered_units(&self) -> usize {
        self.max_buffered_units
    }

    #[inline(always)]
    pub fn decrypt_failure_policy(&self) -> DecryptFailurePolicy {
        self.decrypt_failure_policy
    }

    /// Whether application data and alerts go through the anti-replay window.
    #[inline(always)]
    pub fn replay_protection(&self) -> bool {
        self.replay_protection
    }
}

/// Builder for reassembly configuration.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    max_handshake_message_size: usize,
    max_buffered_units: Option<usize>,
    decrypt_failure_policy: DecryptFailurePolicy,
    replay_protection: bool,
}

impl ConfigBuilder {
    /// Set the largest handshake message to reassemble.
    ///
    /// Must fit the 24 bit length field.
    /// Defaults to 32768.
    pub fn max_handshake_message_size(mut self, size: usize) -> Self {
        self.max_handshake_message_size = size;
        self
    }

    /// Set the max number of buffered fragments and records.
    ///
    /// When the buffer is full, a unit sorting before the last buffered one
    /// takes its place; anything else is dropped and left for the peer to
    /// retransmit.
    /// Defaults to enough 128 byte fragments for the largest handshake
    /// message, plus 32.
    pub fn max_buffered_units(mut self, units: usize) -> Self {
        self.max_buffered_units = Some(units);
        self
    }

    /// Set the decrypt failure policy.
    ///
    /// Defaults to [`DecryptFailurePolicy::Discard`].
    pub fn decrypt_failure_policy(mut self, policy: DecryptFailurePolicy) -> Self {
        self.decrypt_failure_policy = policy;
        self
    }

    /// Set whether to reject replayed application data and alerts.
    ///
    /// Defaults to true.
    pub fn replay_protection(mut self, enabled: bool) -> Self {
        self.replay_protection = enabled;
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::InvalidConfig` if a limit is zero or the message size
    /// does not fit the handshake length field.
    pub fn build(self) -> Result<Config, Error> {
        if self.max_handshake_message_size == 0 {
            return Err(Error::InvalidConfig("max_handshake_message_size is zero"));
        }
        if self.max_handshake_message_size > MAX_LENGTH_FIELD {
            return Err(Error::InvalidConfig(
                "max_handshake_message_size exceeds the 24 bit length field",
            ));
        }
        if self.max_buffered_units == Some(0) {
            return Err(Error::InvalidConfig("max_buffered_units is zero"));
        }

        Ok(self.into_config())
    }

    fn into_config(self) -> Config {
        let max_buffered_units = self.max_buffered_units.unwrap_or_else(|| {
            self.max_handshake_message_size
                .div_ceil(SMALLEST_EXPECTED_FRAGMENT)
                + FLIGHT_UNITS
        });

        Config {
            max_handshake_message_size: self.max_handshake_message_size,
            max_buffered_units,
            decrypt_failure_policy: self.decrypt_failure_policy,
            replay_protection: self.replay_protection,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().into_config()
    }
}
