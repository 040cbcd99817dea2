use rand::Rng;

/// Characters used in generated image names (no `0`).
const IMAGE_NAME_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ123456789";

/// Length of generated image names.
pub const IMAGE_NAME_LENGTH: usize = 5;

const MAX_IMAGE_NAME_LENGTH: usize = 32;
const MAX_FORMAT_LENGTH: usize = 16;

/// Generate a random image name matching `[a-zA-Z1-9]{length}`.
pub fn image_name(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| IMAGE_NAME_ALPHABET[rng.random_range(0..IMAGE_NAME_ALPHABET.len())] as char)
        .collect()
}

/// Check a client-supplied image name: `[a-zA-Z0-9_-]{1,32}`.
pub fn valid_image_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_IMAGE_NAME_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Check an image format (file extension): `[a-zA-Z0-9]{1,16}`.
pub fn valid_format(format: &str) -> bool {
    !format.is_empty()
        && format.len() <= MAX_FORMAT_LENGTH
        && format.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Split a requested file like `abcde.png` into its name and extension.
pub fn split_file_name(file: &str) -> Option<(&str, &str)> {
    let (name, ext) = file.rsplit_once('.')?;
    if valid_image_name(name) && valid_format(ext) {
        Some((name, ext))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_use_the_alphabet() {
        for _ in 0..100 {
            let name = image_name(IMAGE_NAME_LENGTH);
            assert_eq!(name.len(), IMAGE_NAME_LENGTH);
            assert!(name.bytes().all(|b| IMAGE_NAME_ALPHABET.contains(&b)));
            assert!(valid_image_name(&name));
        }
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(!valid_image_name(""));
        assert!(!valid_image_name("../etc"));
        assert!(!valid_image_name("a/b"));
        assert!(!valid_image_name("a.b"));
        assert!(!valid_image_name(&"a".repeat(33)));
        assert!(valid_image_name("my_cat-2"));
    }

    #[test]
    fn rejects_bad_formats() {
        assert!(valid_format("png"));
        assert!(valid_format("JPEG"));
        assert!(!valid_format(""));
        assert!(!valid_format("p.ng"));
        assert!(!valid_format("png/"));
    }

    #[test]
    fn splits_on_last_dot() {
        assert_eq!(split_file_name("abcde.png"), Some(("abcde", "png")));
        assert_eq!(split_file_name("abcde"), None);
        assert_eq!(split_file_name("a.b.png"), None);
        assert_eq!(split_file_name(".png"), None);
    }
}
