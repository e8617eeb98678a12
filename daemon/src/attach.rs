//! Program attachment
//!
//! Attaches the image's fentry programs to their kernel functions and keeps
//! the resulting links in an [`AttachmentSet`]. Detaching only ever happens
//! through [`detach_all`], which empties every slot it touches.

use crate::{
    error::AttachError,
    image::{ProbeImage, ProbePoint},
};
use log::{debug, info, warn};

struct Attachment<L> {
    point: ProbePoint,
    link: Option<L>,
}

/// Ordered attachments owned by the orchestrator
pub struct AttachmentSet<L> {
    slots: Vec<Attachment<L>>,
}

impl<L> AttachmentSet<L> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of live attachments
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.link.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kernel functions currently hooked, in attach order
    pub fn attached(&self) -> impl Iterator<Item = &ProbePoint> {
        self.slots
            .iter()
            .filter(|slot| slot.link.is_some())
            .map(|slot| &slot.point)
    }
}

impl<L> Default for AttachmentSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Attach every program in `points`, in order
///
/// On the first failure, everything attached by this call is detached again
/// before the error is returned.
pub fn attach_all<I: ProbeImage>(
    image: &mut I,
    points: &[ProbePoint],
    set: &mut AttachmentSet<I::Link>,
) -> Result<(), AttachError> {
    info!("Attaching bpf programs to kernel");
    let first_new = set.slots.len();

    for point in points {
        match image.attach(point) {
            Ok(link) => {
                set.slots.push(Attachment {
                    point: *point,
                    link: Some(link),
                });
                debug!("  ✓ Linked fentry/{}", point.function);
            }
            Err(source) => {
                warn!("Failed to link fentry/{}: {}", point.function, source);
                detach_slots(image, &mut set.slots[first_new..]);
                return Err(AttachError {
                    program: point.program,
                    function: point.function,
                    source,
                });
            }
        }
    }

    Ok(())
}

/// Detach every live attachment in reverse attach order
///
/// Empty slots are skipped, so calling this more than once is harmless.
/// Detach failures are logged; the remaining links are still detached.
pub fn detach_all<I: ProbeImage>(image: &mut I, set: &mut AttachmentSet<I::Link>) {
    detach_slots(image, &mut set.slots);
}

fn detach_slots<I: ProbeImage>(image: &mut I, slots: &mut [Attachment<I::Link>]) {
    for slot in slots.iter_mut().rev() {
        let Some(link) = slot.link.take() else {
            continue;
        };
        match image.detach(link) {
            Ok(()) => debug!("Detached fentry/{}", slot.point.function),
            Err(e) => warn!("Failed to detach fentry/{}: {}", slot.point.function, e),
        }
    }
}
