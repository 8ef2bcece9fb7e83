mod control;
mod handle;
mod pool;

pub use control::ControlBlock;
pub use handle::SharedHandle;
pub use pool::PriorityTaskPool;

/*
# SharedHandle
## Shared Ownership:
Multiple handles own the same heap value through one ControlBlock; cloning
increments the count, dropping decrements it, and the drop that reaches zero
frees the value and the block together, exactly once, with no external
synchronization by the caller.

## Lifetime Only:
The handle guarantees the pointee stays alive while any owner exists. It does
not make the pointee's own state thread-safe; wrap the payload in a lock if
workers mutate it.

# PriorityTaskPool
## Highest Priority First:
A fixed set of worker threads drains one unbounded max-priority queue; equal
priorities run in no particular order.

## Drain-And-Join Shutdown:
Dropping the pool stops intake, runs everything still queued, then joins every
worker. Used here as the concurrency harness that races many clone/drop pairs
of one SharedHandle.
*/
