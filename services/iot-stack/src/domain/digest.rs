// 内容ハッシュ
//
// アセットのS3キー、関数バージョンの論理ID、長すぎる論理IDの短縮に使う。

use sha2::{Digest, Sha256};

/// 各部分を区切り付きで連結したSHA-256（小文字16進）
///
/// 区切りを入れるため`["ab", "c"]`と`["a", "bc"]`は別のハッシュになる。
pub fn sha256_hex<I, B>(parts: I) -> String
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
