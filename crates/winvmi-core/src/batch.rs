use zerocopy::{Immutable, IntoBytes};

use crate::{AccessContext, TranslationMechanism, VmiCore, VmiDriver, VmiError};

/// A recorded write, pointing into the batch buffer.
#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    offset: usize,
    address: u64,
    size: usize,
}

/// A group of writes that are recorded now and applied later.
///
/// Recording never touches guest memory. [`commit`] replays the recorded
/// writes in insertion order, each one independently: a failed write is
/// reported but neither stops the remaining writes nor rolls back the ones
/// already applied. A batch dropped without being committed performs no
/// writes at all.
///
/// [`commit`]: Self::commit
pub struct WriteBatch<'a, Driver>
where
    Driver: VmiDriver,
{
    vmi: &'a VmiCore<Driver>,
    mechanism: TranslationMechanism,
    operations: Vec<PendingWrite>,
    buffer: Vec<u8>,
}

impl<'a, Driver> WriteBatch<'a, Driver>
where
    Driver: VmiDriver,
{
    /// Creates an empty batch whose addresses are resolved with `mechanism`.
    pub fn new(vmi: &'a VmiCore<Driver>, mechanism: TranslationMechanism) -> Self {
        Self {
            vmi,
            mechanism,
            operations: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Records a write of `value` to `address`.
    pub fn write<T>(&mut self, address: impl Into<u64>, value: &T) -> &mut Self
    where
        T: IntoBytes + Immutable + ?Sized,
    {
        self.write_bytes(address, value.as_bytes())
    }

    /// Records a write of raw bytes to `address`.
    pub fn write_bytes(&mut self, address: impl Into<u64>, data: &[u8]) -> &mut Self {
        self.operations.push(PendingWrite {
            offset: self.buffer.len(),
            address: address.into(),
            size: data.len(),
        });
        self.buffer.extend_from_slice(data);
        self
    }

    /// Returns the number of recorded writes.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns `true` if no write has been recorded.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies the recorded writes in insertion order.
    pub fn commit(mut self) -> CommitReport {
        let operations = std::mem::take(&mut self.operations);
        let mut results = Vec::with_capacity(operations.len());

        for operation in &operations {
            let ctx = AccessContext {
                address: operation.address,
                mechanism: self.mechanism,
            };
            let data = &self.buffer[operation.offset..operation.offset + operation.size];

            let result = self.vmi.write(ctx, data);
            if let Err(err) = &result {
                tracing::warn!(%ctx, size = operation.size, %err, "batched write failed");
            }

            results.push(result);
        }

        let report = CommitReport { results };
        tracing::debug!(
            writes = report.len(),
            failed = report.failures(),
            "write batch committed"
        );
        report
    }

    /// Drops the recorded writes without applying any of them.
    pub fn discard(self) {}
}

impl<Driver> Drop for WriteBatch<'_, Driver>
where
    Driver: VmiDriver,
{
    fn drop(&mut self) {
        if !self.operations.is_empty() {
            tracing::debug!(
                pending = self.operations.len(),
                "discarding uncommitted write batch"
            );
        }
    }
}

/// Outcome of [`WriteBatch::commit`], one result per recorded write.
#[derive(Debug)]
pub struct CommitReport {
    results: Vec<Result<(), VmiError>>,
}

impl CommitReport {
    /// Returns the per-write results, in insertion order.
    pub fn results(&self) -> &[Result<(), VmiError>] {
        &self.results
    }

    /// Returns the index and error of the first failed write.
    pub fn first_error(&self) -> Option<(usize, &VmiError)> {
        self.results
            .iter()
            .enumerate()
            .find_map(|(index, result)| result.as_ref().err().map(|err| (index, err)))
    }

    /// Returns `true` if every write succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(Result::is_ok)
    }

    /// Returns the number of writes that were attempted.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the number of failed writes.
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| result.is_err()).count()
    }

    /// Converts the report into the first error, if any.
    pub fn into_result(self) -> Result<(), VmiError> {
        self.results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
    }
}
