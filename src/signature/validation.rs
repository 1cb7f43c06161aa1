use crate::proto::Type;

use super::stack::{Stack, StackValue};
use super::{SignatureError, SignatureErrorKind, MAX_CONTAINER_DEPTH, MAX_DEPTH, MAX_SIGNATURE};

/// The container a signature walk is currently inside of.
#[derive(Default, Debug, Clone, Copy)]
#[repr(u8)]
pub(super) enum Container {
    #[default]
    None,
    Array,
    Struct,
    DictEntry,
}

impl StackValue for (Container, u8) {
    const DEFAULT: Self = (Container::None, 0);
}

impl StackValue for Container {
    const DEFAULT: Self = Container::None;
}

/// Validate a signature: every bracket balanced, every array followed by a
/// complete type, dict entries only inside arrays with a basic key and
/// exactly two fields, and the whole thing no longer than 255 bytes.
///
/// Runs in a const context so static signatures are checked at compile
/// time.
#[allow(unused_assignments)]
pub(crate) const fn validate(bytes: &[u8]) -> Result<(), SignatureError> {
    use SignatureErrorKind::*;

    if bytes.len() > MAX_SIGNATURE {
        return Err(SignatureError::new(SignatureTooLong));
    }

    // Each slot is an open container paired with the number of complete
    // types seen inside it so far.
    let mut stack = Stack::<(Container, u8), MAX_DEPTH>::new();
    let mut arrays = 0;
    let mut structs = 0;
    let mut n = 0;

    while n < bytes.len() {
        let t = Type::new(bytes[n]);
        n += 1;

        // Container openers push and move on; everything else completes a
        // type here, and `key_legal` records whether that type may serve as
        // a dict-entry key. Variant is a complete single type but still a
        // container, so it never qualifies.
        let mut key_legal = match t {
            Type::ARRAY => {
                if arrays == MAX_CONTAINER_DEPTH
                    || !stack_try_push!(stack, (Container::Array, 0))
                {
                    return Err(SignatureError::new(ExceededMaximumArrayRecursion));
                }

                arrays += 1;
                continue;
            }
            Type::OPEN_PAREN => {
                if structs == MAX_CONTAINER_DEPTH
                    || !stack_try_push!(stack, (Container::Struct, 0))
                {
                    return Err(SignatureError::new(ExceededMaximumStructRecursion));
                }

                structs += 1;
                continue;
            }
            Type::OPEN_BRACE => {
                if !stack_try_push!(stack, (Container::DictEntry, 0)) {
                    return Err(SignatureError::new(ExceededMaximumDictRecursion));
                }

                continue;
            }
            Type::CLOSE_PAREN => {
                match stack_pop!(stack, (Container, u8)) {
                    Some((Container::Struct, 0)) => {
                        return Err(SignatureError::new(StructHasNoFields));
                    }
                    Some((Container::Struct, _)) => {}
                    Some((Container::Array, _)) => {
                        return Err(SignatureError::new(MissingArrayElementType));
                    }
                    _ => {
                        return Err(SignatureError::new(StructEndedButNotStarted));
                    }
                }

                structs -= 1;
                false
            }
            Type::CLOSE_BRACE => {
                match stack_pop!(stack, (Container, u8)) {
                    Some((Container::DictEntry, 2)) => {}
                    Some((Container::DictEntry, 0)) => {
                        return Err(SignatureError::new(DictEntryHasNoFields));
                    }
                    Some((Container::DictEntry, 1)) => {
                        return Err(SignatureError::new(DictEntryHasOnlyOneField));
                    }
                    Some((Container::DictEntry, _)) => {
                        return Err(SignatureError::new(DictEntryHasTooManyFields));
                    }
                    Some((Container::Array, _)) => {
                        return Err(SignatureError::new(MissingArrayElementType));
                    }
                    _ => {
                        return Err(SignatureError::new(DictEndedButNotStarted));
                    }
                }

                if !matches!(stack_peek!(stack), Some((Container::Array, _))) {
                    return Err(SignatureError::new(DictEntryNotInsideArray));
                }

                false
            }
            Type::VARIANT => false,
            t if t.is_basic() => true,
            t => return Err(SignatureError::new(UnknownTypeCode(t))),
        };

        // An array is completed by the single complete type following it;
        // unwind every array this type closes. Whatever closed them is an
        // array itself, which no dict key may be.
        while let Some((Container::Array, _)) = stack_peek!(stack) {
            stack_pop!(stack, (Container, u8));
            key_legal = false;
        }

        // The first complete type inside a dict entry is its key.
        if let Some((Container::DictEntry, 0)) = stack_peek!(stack) {
            if !key_legal {
                return Err(SignatureError::new(DictKeyMustBeBasicType));
            }
        }

        if let Some((container, seen)) = stack_pop!(stack, (Container, u8)) {
            stack_try_push!(stack, (container, seen + 1));
        }
    }

    match stack_pop!(stack, (Container, u8)) {
        Some((Container::Array, _)) => Err(SignatureError::new(MissingArrayElementType)),
        Some((Container::Struct, _)) => Err(SignatureError::new(StructStartedButNotEnded)),
        Some((Container::DictEntry, _)) => Err(SignatureError::new(DictStartedButNotEnded)),
        _ => Ok(()),
    }
}
